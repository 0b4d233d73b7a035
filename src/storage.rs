//! The persisted user profile. The height-entry collaborator writes it;
//! the result synthesizer reads it at the end of a capture.

use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Accepted height range, matching the height-entry form.
pub const MIN_HEIGHT_CM: f64 = 140.0;
pub const MAX_HEIGHT_CM: f64 = 180.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileData {
    pub height_cm: f64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn storage_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("stature");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".stature");
    }
    PathBuf::from("./data")
}

pub fn profile_path() -> PathBuf {
    storage_dir().join("profile.json")
}

pub fn load_profile() -> Option<ProfileData> {
    let path = profile_path();
    if !path.exists() {
        debug!("No profile at {:?}", path);
        return None;
    }
    let content = fs::read_to_string(&path).ok()?;
    serde_json::from_str(&content).ok()
}

/// The stored height in centimeters, if the user has entered one.
pub fn stored_height() -> Option<f64> {
    load_profile().map(|profile| profile.height_cm)
}

pub fn save_height(height_cm: f64) -> Result<()> {
    if !(MIN_HEIGHT_CM..=MAX_HEIGHT_CM).contains(&height_cm) {
        anyhow::bail!(
            "Height must be between {} cm and {} cm.",
            MIN_HEIGHT_CM,
            MAX_HEIGHT_CM
        );
    }

    let now = Utc::now().to_rfc3339();
    let profile = match load_profile() {
        Some(mut profile) => {
            profile.height_cm = height_cm;
            profile.updated_at = now;
            profile
        }
        None => ProfileData {
            height_cm,
            created_at: now.clone(),
            updated_at: now,
        },
    };

    let dir = storage_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create storage directory {:?}", dir))?;

    let path = profile_path();
    let content = serde_json::to_string_pretty(&profile)?;
    fs::write(&path, content).with_context(|| format!("Failed to write profile to {:?}", path))?;

    debug!("Saved profile to {:?}", path);
    Ok(())
}

pub fn delete_profile() -> Result<()> {
    let path = profile_path();
    if path.exists() {
        fs::remove_file(&path).with_context(|| format!("Failed to delete profile {:?}", path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_height_is_rejected() {
        assert!(save_height(139.9).is_err());
        assert!(save_height(180.1).is_err());
    }

    #[test]
    fn test_profile_round_trips_through_json() {
        let profile = ProfileData {
            height_cm: 165.0,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            updated_at: "2024-01-02T00:00:00+00:00".to_string(),
        };
        let json = serde_json::to_string(&profile).unwrap();
        let back: ProfileData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.height_cm, 165.0);
        assert_eq!(back.created_at, profile.created_at);
    }

    #[test]
    fn test_legacy_profile_without_timestamps_loads() {
        let back: ProfileData = serde_json::from_str(r#"{ "height_cm": 172.0 }"#).unwrap();
        assert_eq!(back.height_cm, 172.0);
        assert!(back.created_at.is_empty());
    }
}
