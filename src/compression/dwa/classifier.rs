
//! Decides which compression scheme each channel gets.
//!
//! Color-carrying channels go through the lossy DCT path. Channels that
//! must survive exactly, such as alpha mattes, depth, and object ids,
//! take a lossless route. The decision is made from the channel name
//! suffix behind the last dot, and is stored in the compressed stream,
//! so decoding never depends on the rule set in use.

use crate::meta::attribute::{ChannelDescription, SampleType};


/// How one channel travels through the dwa codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {

    /// Quantized 8×8 DCT coefficients. Lossy.
    LossyDct,

    /// Run-length coded raw samples. Lossless, best for mattes.
    Rle,

    /// Deflated raw samples. Lossless.
    Zip,
}

impl Scheme {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Scheme::LossyDct => 0,
            Scheme::Rle => 1,
            Scheme::Zip => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Scheme::LossyDct),
            1 => Some(Scheme::Rle),
            2 => Some(Scheme::Zip),
            _ => None,
        }
    }
}

/// One name-based classification rule.
#[derive(Debug, Clone)]
pub struct Rule {

    /// The channel base name this rule applies to.
    pub suffix: &'static str,

    /// Whether the suffix comparison ignores case.
    pub case_insensitive: bool,

    /// The scheme channels matching this rule are assigned.
    pub scheme: Scheme,
}

/// The rule set deciding the scheme per channel. Not part of the on-disk
/// contract: the chosen scheme is recorded in each compressed chunk.
#[derive(Debug, Clone)]
pub struct ChannelRules {
    rules: Vec<Rule>,
}

impl Default for ChannelRules {
    fn default() -> Self {
        let mut rules = Vec::new();

        // color channels, luminance and chroma, take the lossy path
        for suffix in ["R", "G", "B", "Y", "RY", "BY"] {
            rules.push(Rule { suffix, case_insensitive: false, scheme: Scheme::LossyDct });
        }

        for suffix in ["red", "green", "blue"] {
            rules.push(Rule { suffix, case_insensitive: true, scheme: Scheme::LossyDct });
        }

        // mattes must survive exactly
        rules.push(Rule { suffix: "A", case_insensitive: true, scheme: Scheme::Rle });

        ChannelRules { rules }
    }
}

impl ChannelRules {

    /// A rule set with no rules, which sends every channel
    /// through the lossless path.
    pub fn lossless_only() -> Self {
        ChannelRules { rules: Vec::new() }
    }

    /// Decide the scheme for the channel.
    /// Unmatched channels and all u32 channels are stored losslessly.
    pub fn classify(&self, channel: &ChannelDescription) -> Scheme {
        if channel.sample_type == SampleType::U32 {
            return Scheme::Zip;
        }

        let name = channel.name.to_string();
        let suffix = name.rsplit('.').next().unwrap_or(&name);

        for rule in &self.rules {
            let matches =
                if rule.case_insensitive { rule.suffix.eq_ignore_ascii_case(suffix) }
                else { rule.suffix == suffix };

            if matches { return rule.scheme; }
        }

        Scheme::Zip
    }
}
