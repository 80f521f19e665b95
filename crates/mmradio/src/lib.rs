//! Multimode broadcast receiver.
//!
//! Decoding chains for wideband FM (mono and stereo), the AM family
//! (AM, DSB, USB, LSB, CW) and narrow-band FM, together with the audio
//! sinks, the pulse-per-second writer and the three-thread pipeline that
//! moves blocks from a tuner to a sound card or file.

use std::str::FromStr;

use vaquero::Error;

pub mod am;
pub mod fm;
pub mod multipath;
pub mod nbfm;
pub mod output;
pub mod pipeline;
pub mod pps;

pub use am::AmDecoder;
pub use fm::FmDecoder;
pub use nbfm::NbfmDecoder;

/// Modulation type selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModType {
    Fm,
    Am,
    Dsb,
    Usb,
    Lsb,
    Cw,
    Nbfm,
}

impl ModType {
    /// True for the AM-family modes sharing the envelope/SSB chain.
    pub fn is_am_family(&self) -> bool {
        matches!(
            self,
            ModType::Am | ModType::Dsb | ModType::Usb | ModType::Lsb | ModType::Cw
        )
    }
}

impl FromStr for ModType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "fm" => Ok(ModType::Fm),
            "am" => Ok(ModType::Am),
            "dsb" => Ok(ModType::Dsb),
            "usb" => Ok(ModType::Usb),
            "lsb" => Ok(ModType::Lsb),
            "cw" => Ok(ModType::Cw),
            "nbfm" => Ok(ModType::Nbfm),
            other => Err(Error::config(format!("unknown modulation type '{}'", other))),
        }
    }
}

impl std::fmt::Display for ModType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModType::Fm => "fm",
            ModType::Am => "am",
            ModType::Dsb => "dsb",
            ModType::Usb => "usb",
            ModType::Lsb => "lsb",
            ModType::Cw => "cw",
            ModType::Nbfm => "nbfm",
        };
        f.write_str(name)
    }
}

/// IF filter width selector; the passband depends on the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Wide,
    Default,
    Medium,
    Narrow,
}

impl FromStr for FilterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "wide" => Ok(FilterType::Wide),
            "default" => Ok(FilterType::Default),
            "medium" => Ok(FilterType::Medium),
            "narrow" => Ok(FilterType::Narrow),
            other => Err(Error::config(format!("unknown filter type '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modtype_parsing() {
        assert_eq!(ModType::from_str("fm").unwrap(), ModType::Fm);
        assert_eq!(ModType::from_str("CW").unwrap(), ModType::Cw);
        assert!(ModType::from_str("wfm").is_err());
        assert!(ModType::Usb.is_am_family());
        assert!(!ModType::Nbfm.is_am_family());
    }

    #[test]
    fn test_filtertype_parsing() {
        assert_eq!(FilterType::from_str("medium").unwrap(), FilterType::Medium);
        assert!(FilterType::from_str("ultra").is_err());
    }
}
