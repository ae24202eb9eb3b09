pub mod action;
pub mod back;
pub mod cooldown;
pub mod rtp;
pub mod tpa;
pub mod warmup;
