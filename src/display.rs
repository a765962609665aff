//! Terminal output for search results, answers and index status.
//!
//! Everything writes to a generic [`Write`] so the CLI passes `stdout()` and the tests a
//! byte buffer. Colours are crossterm escape sequences.

use std::io::{self, Write};

use crossterm::{
    QueueableCommand,
    style::{Attribute, Color, Print, SetAttribute, SetForegroundColor},
};

use crate::lifecycle::{IndexPhase, IndexReport, IndexStatus, RemoteIndexState, SearchResponse};
use crate::support::Answer;
use crate::vector_service::QueryResult;

fn heading<W: Write>(out: &mut W, color: Color, text: &str) -> io::Result<()> {
    out.queue(SetForegroundColor(color))?
        .queue(SetAttribute(Attribute::Bold))?
        .queue(Print(text))?
        .queue(SetAttribute(Attribute::Reset))?
        .queue(SetForegroundColor(Color::Reset))?
        .queue(Print("\n"))?;
    Ok(())
}

fn print_result<W: Write>(out: &mut W, rank: usize, result: &QueryResult) -> io::Result<()> {
    out.queue(SetForegroundColor(Color::Yellow))?
        .queue(Print(format!("{rank}. {}", result.id)))?
        .queue(SetForegroundColor(Color::Reset))?;
    if let Some(distance) = result.distance {
        out.queue(SetForegroundColor(Color::DarkGrey))?
            .queue(Print(format!(" (distance {distance:.4})")))?
            .queue(SetForegroundColor(Color::Reset))?;
    }
    if let Some(meta) = &result.metadata {
        out.queue(Print(format!(" [{}]\n   {}", meta.category, meta.text)))?;
    }
    out.queue(Print("\n"))?;
    Ok(())
}

pub fn print_search<W: Write>(out: &mut W, query: &str, response: &SearchResponse) -> io::Result<()> {
    heading(out, Color::Cyan, &format!("Query: {query}"))?;
    if response.results.is_empty() {
        out.queue(Print("No matching tickets.\n"))?;
    }
    for (i, result) in response.results.iter().enumerate() {
        print_result(out, i + 1, result)?;
    }
    out.queue(SetForegroundColor(Color::DarkGrey))?
        .queue(Print(format!(
            "Search time: {:.2}ms\n",
            response.elapsed.as_secs_f64() * 1000.0
        )))?
        .queue(SetForegroundColor(Color::Reset))?;
    out.flush()
}

pub fn print_answer<W: Write>(out: &mut W, question: &str, answer: &Answer) -> io::Result<()> {
    heading(out, Color::Cyan, &format!("Question: {question}"))?;
    heading(
        out,
        Color::Blue,
        &format!(
            "Retrieved tickets ({} used in prompt):",
            answer.tickets_used
        ),
    )?;
    for (i, result) in answer.results.iter().enumerate() {
        print_result(out, i + 1, result)?;
    }
    heading(out, Color::Green, "Answer:")?;
    out.queue(Print(answer.answer.trim()))?.queue(Print("\n"))?;
    out.queue(SetForegroundColor(Color::DarkGrey))?
        .queue(Print(format!(
            "Search time: {:.2}ms\n",
            answer.search_elapsed.as_secs_f64() * 1000.0
        )))?
        .queue(SetForegroundColor(Color::Reset))?;
    out.flush()
}

pub fn print_status<W: Write>(out: &mut W, status: &IndexStatus) -> io::Result<()> {
    let (color, phase) = match status.phase {
        IndexPhase::Ready => (Color::Green, "ready"),
        IndexPhase::Recovering => (Color::Yellow, "recovering"),
        IndexPhase::Uninitialized => (Color::Red, "uninitialized"),
    };
    out.queue(Print(format!("Index:       {}\nState:       ", status.index_name)))?
        .queue(SetForegroundColor(color))?
        .queue(Print(phase))?
        .queue(SetForegroundColor(Color::Reset))?
        .queue(Print(format!(
            "\nKey:         {}\nKey store:   {}\nRecoveries:  {}\n",
            status.key_fingerprint, status.key_location, status.recoveries
        )))?;
    out.flush()
}

pub fn print_report<W: Write>(out: &mut W, report: &IndexReport) -> io::Result<()> {
    let (color, remote) = match report.remote {
        RemoteIndexState::Opens => (Color::Green, "opens with stored key"),
        RemoteIndexState::Unverified => (Color::Yellow, "present, no stored key to check"),
        RemoteIndexState::Missing => (Color::Yellow, "missing"),
        RemoteIndexState::KeyMismatch => (Color::Red, "key mismatch"),
    };
    out.queue(Print(format!("Index:       {}\nRemote:      ", report.index_name)))?
        .queue(SetForegroundColor(color))?
        .queue(Print(remote))?
        .queue(SetForegroundColor(Color::Reset))?
        .queue(Print(format!(
            "\nKey:         {}\nKey store:   {}\n",
            report.key_fingerprint.as_deref().unwrap_or("none"),
            report.key_location
        )))?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_service::TicketMetadata;
    use std::time::Duration;

    fn result(id: &str, text: &str) -> QueryResult {
        QueryResult {
            id: id.into(),
            metadata: Some(TicketMetadata {
                text: text.into(),
                category: "porting".into(),
            }),
            distance: Some(0.125),
        }
    }

    fn rendered(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_print_search_lists_ranked_tickets() {
        let response = SearchResponse {
            results: vec![
                result("ticket_4", "Issue: Port-in request stuck"),
                result("ticket_9", "Issue: Cannot receive SMS codes"),
            ],
            elapsed: Duration::from_millis(12),
        };
        let mut buf = Vec::new();
        print_search(&mut buf, "port", &response).unwrap();
        let text = rendered(buf);

        assert!(text.contains("Query: port"));
        assert!(text.contains("1. ticket_4"));
        assert!(text.contains("2. ticket_9"));
        assert!(text.contains("(distance 0.1250)"));
        assert!(text.contains("[porting]"));
        let first = text.find("ticket_4").unwrap();
        let second = text.find("ticket_9").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_print_search_empty() {
        let response = SearchResponse {
            results: Vec::new(),
            elapsed: Duration::ZERO,
        };
        let mut buf = Vec::new();
        print_search(&mut buf, "anything", &response).unwrap();
        assert!(rendered(buf).contains("No matching tickets."));
    }

    #[test]
    fn test_print_answer_and_status() {
        let answer = Answer {
            answer: "  Submit the port-in again with the correct PIN.\n".into(),
            results: vec![result("ticket_4", "Issue: Port-in request stuck")],
            search_elapsed: Duration::from_millis(3),
            tickets_used: 1,
        };
        let mut buf = Vec::new();
        print_answer(&mut buf, "Port stuck?", &answer).unwrap();
        let text = rendered(buf);
        assert!(text.contains("1 used in prompt"));
        assert!(text.contains("Submit the port-in again with the correct PIN.\n"));

        let status = IndexStatus {
            index_name: "support_tickets".into(),
            phase: IndexPhase::Ready,
            key_fingerprint: "abc123def456".into(),
            key_location: "/tmp/encryption_key.bin".into(),
            recoveries: 2,
        };
        let mut buf = Vec::new();
        print_status(&mut buf, &status).unwrap();
        let text = rendered(buf);
        assert!(text.contains("support_tickets"));
        assert!(text.contains("ready"));
        assert!(text.contains("abc123def456"));
        assert!(text.contains("Recoveries:  2"));
    }

    #[test]
    fn test_print_report() {
        let report = IndexReport {
            index_name: "support_tickets".into(),
            key_location: "/tmp/encryption_key.bin".into(),
            key_fingerprint: None,
            remote: RemoteIndexState::KeyMismatch,
        };
        let mut buf = Vec::new();
        print_report(&mut buf, &report).unwrap();
        let text = rendered(buf);
        assert!(text.contains("key mismatch"));
        assert!(text.contains("Key:         none"));
    }
}
