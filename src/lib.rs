//! Costoor polls an AWS account's EC2, RDS and CloudFormation APIs,
//! aggregates resource counts and states into metric groups, and derives
//! running-cost estimates adjusted for the time elapsed since the last poll.

pub mod aws;
pub mod classify;
pub mod clock;
pub mod config;
pub mod measure;
pub mod monitor;
pub mod pricing;
pub mod sink;
