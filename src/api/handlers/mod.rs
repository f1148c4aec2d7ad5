//! HTTP handlers for the OTP and health endpoints.

pub mod health;
pub mod otp;
