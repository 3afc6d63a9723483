pub mod config;
pub mod db;
pub mod error;
pub mod rest;
pub mod security;
