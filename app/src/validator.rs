// ==============================================================================
// validator.rs - Input File Validation
// ==============================================================================
// Description: Validates genotype input files (existence, size, magic number)
//              and computes their checksums for the run summary
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-14
// Version: 2.1.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::parsers::binary_plink::BED_MAGIC;

const MAX_FILE_SIZE: u64 = 8 * 1024 * 1024 * 1024; // 8 GB

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedInput {
    pub path: PathBuf,
    pub size: u64,
    pub hash_sha256: String,
    pub validated_at: chrono::DateTime<chrono::Utc>,
}

pub struct InputValidator {
    max_file_size: u64,
}

impl InputValidator {
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn with_max_size(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn validate(&self, file_path: &Path) -> Result<ValidatedInput> {
        info!("Validating input: {:?}", file_path);

        // 1. Existence and size
        let metadata = std::fs::metadata(file_path)
            .with_context(|| format!("Input file not found: {:?}", file_path))?;

        if !metadata.is_file() {
            anyhow::bail!("Not a regular file: {:?}", file_path);
        }

        // An empty PED or FAM is a dataset without samples. Formats with a
        // magic number can't be empty.
        let size = metadata.len();
        if size == 0 {
            if self.expected_magic(file_path).is_some() {
                anyhow::bail!("File is empty: {:?}", file_path);
            }
            warn!("Input file is empty: {:?}", file_path);
        }
        if size > self.max_file_size {
            anyhow::bail!(
                "File too large: {} bytes (max: {} bytes)",
                size,
                self.max_file_size
            );
        }
        debug!("Size check passed: {} bytes", size);

        // 2. Magic number verification
        if let Some(expected_magic) = self.expected_magic(file_path) {
            let actual_magic = self.read_magic_number(file_path)?;
            if !self.verify_magic_number(expected_magic, &actual_magic) {
                anyhow::bail!("Magic number mismatch for {:?}", file_path);
            }
            debug!("Magic number check passed");
        }

        // 3. Compute SHA-256 hash
        let hash = self.compute_sha256(file_path)?;
        debug!("SHA-256: {}", hash);

        Ok(ValidatedInput {
            path: file_path.to_path_buf(),
            size,
            hash_sha256: hash,
            validated_at: chrono::Utc::now(),
        })
    }

    pub fn validate_all(&self, paths: &[PathBuf]) -> Result<Vec<ValidatedInput>> {
        paths.iter().map(|path| self.validate(path)).collect()
    }

    fn expected_magic(&self, path: &Path) -> Option<&'static [u8]> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bed") => Some(&BED_MAGIC),
            Some("gz") => Some(&GZIP_MAGIC),
            _ => None,
        }
    }

    fn read_magic_number(&self, path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::with_capacity(4);
        file.by_ref().take(4).read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn verify_magic_number(&self, expected: &[u8], actual: &[u8]) -> bool {
        expected.len() <= actual.len()
            && expected.iter().zip(actual.iter()).all(|(e, a)| e == a)
    }

    fn compute_sha256(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 8192];

        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}
