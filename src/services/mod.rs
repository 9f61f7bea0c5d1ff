pub mod backtest;
pub mod collector;
pub mod estimators;
pub mod features;
pub mod grid;
pub mod predictor;
