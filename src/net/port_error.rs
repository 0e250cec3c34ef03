use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// No bindable even/odd pair in `[from, from + window)`.
    Exhausted { from: u16, window: u16 },
    AlreadyLeased(u16),
    InvalidRange { start: u16, end: u16 },
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Exhausted { from, window } => write!(
                f,
                "no free port pair in {}..{}",
                from,
                u32::from(*from) + u32::from(*window)
            ),
            PortError::AlreadyLeased(p) => write!(f, "port {p} is already leased"),
            PortError::InvalidRange { start, end } => {
                write!(f, "invalid port range {start}..={end}")
            }
        }
    }
}

impl std::error::Error for PortError {}
