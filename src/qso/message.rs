//! Standard FT8/FT4 exchange messages.

use std::fmt;

/// Recognized message kinds of a standard exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtMessage {
    /// `CQ [DX|POTA|..] CALL [GRID]`.
    Cq {
        /// Directed-CQ modifier such as `DX`.
        modifier: Option<String>,
        /// Calling station.
        from: String,
        /// Grid square, when sent.
        grid: Option<String>,
    },
    /// `TO FROM GRID`.
    Grid {
        /// Addressee.
        to: String,
        /// Sender.
        from: String,
        /// Four-character Maidenhead square.
        grid: String,
    },
    /// `TO FROM -10`.
    Report {
        /// Addressee.
        to: String,
        /// Sender.
        from: String,
        /// Signal report in dB.
        snr: i32,
    },
    /// `TO FROM R-10`.
    RogerReport {
        /// Addressee.
        to: String,
        /// Sender.
        from: String,
        /// Signal report in dB.
        snr: i32,
    },
    /// `TO FROM RR73` or `TO FROM RRR`.
    Roger {
        /// Addressee.
        to: String,
        /// Sender.
        from: String,
        /// True for `RR73`.
        with_73: bool,
    },
    /// `TO FROM 73`.
    SeventyThree {
        /// Addressee.
        to: String,
        /// Sender.
        from: String,
    },
    /// Anything else, kept verbatim.
    FreeText(String),
}

impl FtMessage {
    /// Parses decoded text. Never fails; unknown shapes become [`FtMessage::FreeText`].
    pub fn parse(text: &str) -> Self {
        let upper = text.trim().to_ascii_uppercase();
        let tokens: Vec<&str> = upper.split_whitespace().collect();

        match tokens.as_slice() {
            ["CQ", from] => FtMessage::Cq {
                modifier: None,
                from: (*from).to_string(),
                grid: None,
            },
            ["CQ", a, b] if is_grid(b) => FtMessage::Cq {
                modifier: None,
                from: (*a).to_string(),
                grid: Some((*b).to_string()),
            },
            ["CQ", modifier, from] => FtMessage::Cq {
                modifier: Some((*modifier).to_string()),
                from: (*from).to_string(),
                grid: None,
            },
            ["CQ", modifier, from, grid] if is_grid(grid) => FtMessage::Cq {
                modifier: Some((*modifier).to_string()),
                from: (*from).to_string(),
                grid: Some((*grid).to_string()),
            },
            [to, from, payload] => parse_directed(to, from, payload)
                .unwrap_or_else(|| FtMessage::FreeText(upper.clone())),
            _ => FtMessage::FreeText(upper.clone()),
        }
    }

    /// Addressee of a directed message.
    pub fn to(&self) -> Option<&str> {
        match self {
            FtMessage::Grid { to, .. }
            | FtMessage::Report { to, .. }
            | FtMessage::RogerReport { to, .. }
            | FtMessage::Roger { to, .. }
            | FtMessage::SeventyThree { to, .. } => Some(to),
            FtMessage::Cq { .. } | FtMessage::FreeText(_) => None,
        }
    }

    /// Sending station, when the message names one.
    pub fn from(&self) -> Option<&str> {
        match self {
            FtMessage::Cq { from, .. }
            | FtMessage::Grid { from, .. }
            | FtMessage::Report { from, .. }
            | FtMessage::RogerReport { from, .. }
            | FtMessage::Roger { from, .. }
            | FtMessage::SeventyThree { from, .. } => Some(from),
            FtMessage::FreeText(_) => None,
        }
    }

    /// True when the message is directed at `call`.
    pub fn is_addressed_to(&self, call: &str) -> bool {
        self.to().is_some_and(|to| to.eq_ignore_ascii_case(call))
    }
}

impl fmt::Display for FtMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtMessage::Cq {
                modifier,
                from,
                grid,
            } => {
                f.write_str("CQ")?;
                if let Some(m) = modifier {
                    write!(f, " {m}")?;
                }
                write!(f, " {from}")?;
                if let Some(g) = grid {
                    write!(f, " {g}")?;
                }
                Ok(())
            }
            FtMessage::Grid { to, from, grid } => write!(f, "{to} {from} {grid}"),
            FtMessage::Report { to, from, snr } => write!(f, "{to} {from} {}", format_report(*snr)),
            FtMessage::RogerReport { to, from, snr } => {
                write!(f, "{to} {from} R{}", format_report(*snr))
            }
            FtMessage::Roger { to, from, with_73 } => {
                write!(f, "{to} {from} {}", if *with_73 { "RR73" } else { "RRR" })
            }
            FtMessage::SeventyThree { to, from } => write!(f, "{to} {from} 73"),
            FtMessage::FreeText(text) => f.write_str(text),
        }
    }
}

/// Formats an SNR as a two-digit signed report, clamped to `-30..=30`.
pub fn format_report(snr: i32) -> String {
    format!("{:+03}", snr.clamp(-30, 30))
}

/// True for a four-character Maidenhead square such as `FN42`.
pub fn is_grid(s: &str) -> bool {
    let b = s.as_bytes();
    // RR73 has grid shape but is always the roger token.
    b.len() == 4
        && s != "RR73"
        && (b'A'..=b'R').contains(&b[0])
        && (b'A'..=b'R').contains(&b[1])
        && b[2].is_ascii_digit()
        && b[3].is_ascii_digit()
}

fn parse_report(s: &str) -> Option<i32> {
    let b = s.as_bytes();
    if b.len() != 3 || !(b[0] == b'+' || b[0] == b'-') {
        return None;
    }
    if !b[1].is_ascii_digit() || !b[2].is_ascii_digit() {
        return None;
    }
    s.parse::<i32>().ok()
}

fn parse_directed(to: &str, from: &str, payload: &str) -> Option<FtMessage> {
    let to = to.to_string();
    let from = from.to_string();
    let msg = match payload {
        "RR73" => FtMessage::Roger {
            to,
            from,
            with_73: true,
        },
        "RRR" => FtMessage::Roger {
            to,
            from,
            with_73: false,
        },
        "73" => FtMessage::SeventyThree { to, from },
        p if is_grid(p) => FtMessage::Grid {
            to,
            from,
            grid: p.to_string(),
        },
        p => {
            if let Some(snr) = p.strip_prefix('R').and_then(parse_report) {
                FtMessage::RogerReport { to, from, snr }
            } else {
                let snr = parse_report(p)?;
                FtMessage::Report { to, from, snr }
            }
        }
    };
    Some(msg)
}
