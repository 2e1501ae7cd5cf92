//! Matching Service - reconciles uploaded documents with partners and bank transactions.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod startup;
