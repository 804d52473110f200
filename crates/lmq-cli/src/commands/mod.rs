pub mod aggregate;
pub mod configs;
pub mod plan;
pub mod run;
pub mod selection;
pub mod status;
pub mod version;
