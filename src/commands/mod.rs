pub mod correct;
pub mod report;
pub mod status;
pub mod sync;
