pub mod compile;
pub mod prepare;
pub mod run;
pub mod status;
