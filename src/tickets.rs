//! Support-ticket records: loading the JSON ticket document and generating the synthetic
//! dataset used by the demo.
//!
//! A ticket document is a JSON array:
//!
//! ```json
//! [
//!   {
//!     "id": "ticket_0",
//!     "text": "Issue: Cannot receive SMS codes | Solution: Check if SMS blocking is enabled.",
//!     "category": "technical"
//!   }
//! ]
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SupportError, SupportResult};
use crate::vector_service::TicketMetadata;

/// One support ticket. `id` is unique within a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: String,
    pub text: String,
    pub category: String,
}

impl TicketRecord {
    pub fn metadata(&self) -> TicketMetadata {
        TicketMetadata {
            text: self.text.clone(),
            category: self.category.clone(),
        }
    }
}

struct Issue {
    problem: &'static str,
    solution: &'static str,
    category: &'static str,
}

const ISSUES: &[Issue] = &[
    Issue {
        problem: "Unable to activate international roaming",
        solution: "Reset network settings and enable data roaming. Verify roaming is enabled on account.",
        category: "roaming",
    },
    Issue {
        problem: "Error code 5412 after SIM swap",
        solution: "Error 5412 indicates authentication failure. Restart device and wait 10 minutes.",
        category: "technical",
    },
    Issue {
        problem: "Incorrect international charges",
        solution: "Review call logs. Submit billing adjustment if confirmed.",
        category: "billing",
    },
    Issue {
        problem: "Voicemail not working after upgrade",
        solution: "Reset voicemail password by dialing *611.",
        category: "technical",
    },
    Issue {
        problem: "Cannot receive SMS codes",
        solution: "Check if SMS blocking is enabled.",
        category: "technical",
    },
    Issue {
        problem: "Slow data speeds in area",
        solution: "Check network maintenance. Create ticket with location and speed test.",
        category: "network",
    },
    Issue {
        problem: "Account locked due to payment failure",
        solution: "Verify payment method. Account unlock takes 2-4 hours.",
        category: "billing",
    },
    Issue {
        problem: "eSIM activation failing",
        solution: "Ensure iOS is updated. Restart and retry QR code.",
        category: "technical",
    },
    Issue {
        problem: "Port-in request stuck",
        solution: "Verify account number from old carrier. Port takes 2-24 hours.",
        category: "porting",
    },
    Issue {
        problem: "Device won't connect to 5G",
        solution: "Verify device supports 5G bands. Toggle airplane mode.",
        category: "network",
    },
];

/// Generate `count` synthetic tickets, `ticket_0 ..= ticket_{count-1}`, each drawn
/// uniformly from a fixed catalogue of telecom issues.
pub fn generate_tickets<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<TicketRecord> {
    (0..count)
        .filter_map(|i| {
            ISSUES.choose(&mut *rng).map(|issue| TicketRecord {
                id: format!("ticket_{i}"),
                text: format!("Issue: {} | Solution: {}", issue.problem, issue.solution),
                category: issue.category.to_string(),
            })
        })
        .collect()
}

/// Read a ticket document wholesale.
///
/// # Errors
/// - [`SupportError::TicketSource`] if the file cannot be read, is not a JSON array of
///   tickets, or repeats an id.
pub fn load_tickets(path: &Path) -> SupportResult<Vec<TicketRecord>> {
    info!("Loading tickets from {}", path.display());

    let content = fs::read_to_string(path)
        .map_err(|e| SupportError::TicketSource(format!("{}: {e}", path.display())))?;
    let tickets: Vec<TicketRecord> = serde_json::from_str(&content)
        .map_err(|e| SupportError::TicketSource(format!("{}: {e}", path.display())))?;

    let mut seen = HashSet::with_capacity(tickets.len());
    if let Some(dup) = tickets.iter().find(|t| !seen.insert(t.id.as_str())) {
        return Err(SupportError::TicketSource(format!(
            "{}: duplicate ticket id {}",
            path.display(),
            dup.id
        )));
    }

    Ok(tickets)
}

/// Write tickets as pretty-printed JSON.
pub fn write_tickets(path: &Path, tickets: &[TicketRecord]) -> SupportResult<()> {
    let json = serde_json::to_string_pretty(tickets)?;
    fs::write(path, json)?;
    info!("Wrote {} tickets to {}", tickets.len(), path.display());
    Ok(())
}
