pub mod collate;
pub mod list;
pub mod run;
pub mod sweep;
