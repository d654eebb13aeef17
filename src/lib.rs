pub mod aggregate;
pub mod calibration;
pub mod config;
pub mod elo;
pub mod ensemble;
pub mod fake_history;
pub mod features;
pub mod historical_dataset;
pub mod history;
pub mod pipeline;
pub mod poisson;
pub mod predictors;
pub mod rbs;
pub mod records;
pub mod time_decay;
