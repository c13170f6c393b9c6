//! Terminal and HTTP front ends for the price service

pub mod prices;
pub mod serve;
pub mod setup;
pub mod ui;
