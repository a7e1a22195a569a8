// Domain layer - widget model, grid layout engine, time-series pipeline
pub mod dashboard;
pub mod layout;
pub mod sanitize;
pub mod time_series;
pub mod widget;
pub mod widgets;
