// Business domains
pub mod contests;
