pub mod cta;
pub mod intent;
pub mod sentiment;
pub mod session;
pub mod tenant;
pub mod tool;
