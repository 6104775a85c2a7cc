//! Per-core option cache
//!
//! Output sample rates and string options are remembered per decoder name
//! and re-applied whenever that decoder is created. When the active decoder
//! matches, values apply live where the decoder allows it. Capability and
//! policy queries fall back to a temporary registry instance when the active
//! decoder does not match.

use crate::decoder::{Capabilities, OptionApplyPolicy};
use crate::playback::engine::PlayerEngine;
use std::sync::atomic::Ordering;
use tracing::debug;

impl PlayerEngine {
    /// Remember (and, when live-capable, apply) an output sample rate for a
    /// decoder name. A rate of 0 clears the override.
    pub fn set_core_output_sample_rate(&self, core_name: &str, sample_rate_hz: u32) {
        if core_name.is_empty() {
            return;
        }
        let shared = &self.shared;
        let mut guard = shared.decoder.lock().unwrap();
        let slot = &mut *guard;
        slot.core_sample_rates
            .insert(core_name.to_string(), sample_rate_hz);
        debug!(core = core_name, sample_rate_hz, "core output sample rate cached");

        if let Some(decoder) = slot.decoder.as_deref_mut() {
            if decoder.name() == core_name
                && decoder
                    .playback_capabilities()
                    .contains(Capabilities::LIVE_SAMPLE_RATE_CHANGE)
            {
                let stream_rate = shared.stream_sample_rate.load(Ordering::Relaxed);
                let desired = slot
                    .core_sample_rates
                    .get(core_name)
                    .copied()
                    .filter(|rate| *rate > 0)
                    .unwrap_or(if stream_rate > 0 { stream_rate } else { 48_000 });
                decoder.set_output_sample_rate(desired);
                slot.render_sample_rate = decoder.sample_rate();
                slot.resampler.reset();
                let position = shared.position_seconds.load();
                slot.timeline.rebase(position);
            }
        }
    }

    /// Remember (and apply to a matching live decoder) a core option.
    pub fn set_core_option(&self, core_name: &str, option_name: &str, option_value: &str) {
        if core_name.is_empty() || option_name.is_empty() {
            return;
        }
        let mut guard = self.shared.decoder.lock().unwrap();
        let slot = &mut *guard;
        slot.core_options
            .entry(core_name.to_string())
            .or_default()
            .insert(option_name.to_string(), option_value.to_string());
        if let Some(decoder) = slot.decoder.as_deref_mut() {
            if decoder.name() == core_name {
                decoder.set_option(option_name, option_value);
            }
        }
    }

    /// Capabilities for a decoder name, via the active instance when it
    /// matches, otherwise via a temporary registry instance.
    pub fn core_capabilities(&self, core_name: &str) -> Capabilities {
        if core_name.is_empty() {
            return Capabilities::empty();
        }
        {
            let slot = self.shared.decoder.lock().unwrap();
            if let Some(decoder) = slot.decoder.as_deref() {
                if decoder.name() == core_name {
                    return decoder.playback_capabilities();
                }
            }
        }
        self.shared
            .registry
            .create_by_name(core_name)
            .map(|decoder| decoder.playback_capabilities())
            .unwrap_or(Capabilities::empty())
    }

    /// Apply policy for one option of one decoder name.
    pub fn core_option_apply_policy(&self, core_name: &str, option_name: &str) -> OptionApplyPolicy {
        if core_name.is_empty() || option_name.is_empty() {
            return OptionApplyPolicy::Live;
        }
        {
            let slot = self.shared.decoder.lock().unwrap();
            if let Some(decoder) = slot.decoder.as_deref() {
                if decoder.name() == core_name {
                    return decoder.option_apply_policy(option_name);
                }
            }
        }
        self.shared
            .registry
            .create_by_name(core_name)
            .map(|decoder| decoder.option_apply_policy(option_name))
            .unwrap_or(OptionApplyPolicy::Live)
    }

    /// Fixed render rate for a decoder name; 0 when the rate is selectable.
    pub fn core_fixed_sample_rate(&self, core_name: &str) -> u32 {
        if core_name.is_empty() {
            return 0;
        }
        {
            let slot = self.shared.decoder.lock().unwrap();
            if let Some(decoder) = slot.decoder.as_deref() {
                if decoder.name() == core_name {
                    return decoder.fixed_sample_rate();
                }
            }
        }
        self.shared
            .registry
            .create_by_name(core_name)
            .map(|decoder| decoder.fixed_sample_rate())
            .unwrap_or(0)
    }
}
