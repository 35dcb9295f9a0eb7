//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub mod feeds {
    pub const STATUS: &str = "/status";
    pub const LATEST: &str = "/feeds/latest";
    pub const CLEAN_STALE: &str = "/clean-stale";
}
