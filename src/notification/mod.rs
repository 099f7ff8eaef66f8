pub mod controller;
pub mod dispatch;
pub mod inbox;
pub mod model;
pub mod service;
