pub mod bfi;
pub mod count;
pub mod models;
pub mod run;
