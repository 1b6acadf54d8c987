// Calibration service - per-channel corrections, cached in memory and persisted on every change
use crate::domain::calibration::{CalibrationError, Correction, ReferencePoints, TwoPointFit};
use crate::domain::reading::ChannelId;
use crate::infrastructure::calibration_file::CalibrationFile;
use parking_lot::RwLock;
use std::collections::BTreeMap;

pub struct CalibrationService {
    channel_count: ChannelId,
    file: CalibrationFile,
    corrections: RwLock<BTreeMap<ChannelId, Correction>>,
}

impl CalibrationService {
    /// Loads persisted corrections. An unreadable file is logged and every
    /// channel starts uncalibrated.
    pub fn load(file: CalibrationFile, channel_count: ChannelId) -> Self {
        let corrections = match file.load() {
            Ok(corrections) => corrections,
            Err(e) => {
                tracing::error!(
                    file = %file.path().display(),
                    error = %format!("{:#}", e),
                    "Calibration file unreadable, channels start uncalibrated"
                );
                BTreeMap::new()
            }
        };
        tracing::info!(calibrated = corrections.len(), "Loaded calibration profiles");

        Self {
            channel_count,
            file,
            corrections: RwLock::new(corrections),
        }
    }

    /// Corrected temperature. Channels without a profile pass through unchanged.
    pub fn apply(&self, channel: ChannelId, raw: f64) -> f64 {
        self.corrections
            .read()
            .get(&channel)
            .map_or(raw, |correction| correction.apply(raw))
    }

    pub fn set_simple_factor(&self, channel: ChannelId, factor: f64) -> Result<Correction, CalibrationError> {
        self.check_channel(channel)?;
        let correction = Correction::simple(channel, factor)?;
        self.store(channel, correction)?;
        tracing::info!(channel, factor, "Simple calibration set");
        Ok(correction)
    }

    /// Fits and stores a two-point correction. Defaults for the actual
    /// temperatures are 0.0 and 100.0 (ice and boiling water).
    pub fn set_two_point(
        &self,
        channel: ChannelId,
        ice_raw: f64,
        boil_raw: f64,
        ice_actual: Option<f64>,
        boil_actual: Option<f64>,
    ) -> Result<TwoPointFit, CalibrationError> {
        self.check_channel(channel)?;
        let reference = ReferencePoints {
            ice_raw,
            boil_raw,
            ice_actual: ice_actual.unwrap_or(0.0),
            boil_actual: boil_actual.unwrap_or(100.0),
        };
        let (correction, fit) = Correction::two_point(channel, reference)?;
        self.store(channel, correction)?;
        tracing::info!(channel, slope = fit.slope, offset = fit.offset, "Two-point calibration set");
        Ok(fit)
    }

    pub fn reset(&self, channel: ChannelId) -> Result<(), CalibrationError> {
        self.check_channel(channel)?;
        self.store(channel, Correction::None)?;
        tracing::info!(channel, "Calibration reset");
        Ok(())
    }

    pub fn profile(&self, channel: ChannelId) -> Correction {
        self.corrections.read().get(&channel).copied().unwrap_or_default()
    }

    /// Every channel's correction, including uncalibrated ones.
    pub fn profiles(&self) -> BTreeMap<ChannelId, Correction> {
        (1..=self.channel_count).map(|ch| (ch, self.profile(ch))).collect()
    }

    fn check_channel(&self, channel: ChannelId) -> Result<(), CalibrationError> {
        if channel == 0 || channel > self.channel_count {
            return Err(CalibrationError::UnknownChannel(channel));
        }
        Ok(())
    }

    /// Persists first; the cache only changes once the file is written.
    fn store(&self, channel: ChannelId, correction: Correction) -> Result<(), CalibrationError> {
        let mut corrections = self.corrections.write();
        let mut updated = corrections.clone();
        if correction == Correction::None {
            updated.remove(&channel);
        } else {
            updated.insert(channel, correction);
        }
        self.file.save(&updated).map_err(CalibrationError::Persist)?;
        *corrections = updated;
        Ok(())
    }
}
