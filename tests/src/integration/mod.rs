//! Integration flows across the workspace crates.

pub mod harness;

#[cfg(test)]
mod protocol_flows;
#[cfg(test)]
mod runtime_flows;
#[cfg(test)]
mod supervision_flows;
#[cfg(test)]
mod tcp_flows;
