#![allow(unused_imports)]

pub mod container;
pub mod db_setup;
pub mod mock_servers;

pub use db_setup::*;
