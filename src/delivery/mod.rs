pub mod cloak;
pub mod gate;
pub mod packager;
pub mod processor;
pub mod recipients;
pub mod retry;
pub mod status;
pub mod templates;
