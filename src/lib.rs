pub mod broadcast;
pub mod commands;
pub mod device;
pub mod protocols;
pub mod registry;
pub mod settings;
pub mod source;
