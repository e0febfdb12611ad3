pub mod config;
pub mod error;
pub mod http;
pub mod overrides;
pub mod paths;
pub mod poll;
pub mod reconcile;
pub mod sevenbridges;
pub mod synapse;
pub mod tower;
