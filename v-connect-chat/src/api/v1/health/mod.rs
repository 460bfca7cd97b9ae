pub mod basic;
pub mod detailed;
pub mod live;
pub mod ready;
