pub mod data;
pub mod files;
pub mod flow;
pub mod interaction;
pub mod network;
pub mod session;
pub mod sql;
