#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

//! Post-operative fever risk after percutaneous nephrolithotomy (PCNL).
//!
//! A patient's fifteen clinical fields are encoded into the model's feature
//! vector, scored by a trained logistic classifier, bucketed into a risk
//! tier, and explained by per-feature attributions.

pub mod config;
pub mod encode;
pub mod explain;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod risk;
pub mod schema;
pub mod types;
