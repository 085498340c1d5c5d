// ==============================================================================
// lib.rs - Genotype Reconciler Library
// ==============================================================================
// Description: Library interface for the genotype reconciliation modules
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-07
// Version: 2.0.0
// ==============================================================================

pub mod parsers;
pub mod audit;
pub mod validator;
pub mod allele_coding;
pub mod models;
pub mod reference_store;
pub mod sample_store;
pub mod coordinates;
pub mod identity;
pub mod pipeline;
pub mod output;

#[cfg(test)]
mod test_support;
