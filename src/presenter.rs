use clap::ValueEnum;
use payment_protos::payment::{Payment, PaymentEvent, PaymentStatus, Provider};
use serde::Serialize;

use crate::stats::{EventKind, SessionReport};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per event.
    #[default]
    Simple,
    /// A block per event with every payment field.
    Detailed,
    /// One JSON object per line.
    Json,
}

pub fn provider_label(code: i32) -> &'static str {
    Provider::try_from(code)
        .map(|p| p.as_str_name().trim_start_matches("PROVIDER_"))
        .unwrap_or("UNRECOGNIZED")
}

pub fn status_label(code: i32) -> &'static str {
    PaymentStatus::try_from(code)
        .map(|s| s.as_str_name().trim_start_matches("PAYMENT_STATUS_"))
        .unwrap_or("UNRECOGNIZED")
}

/// What gets shown for each classified event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventLine {
    pub payment_id: String,
    pub event_type: EventKind,
    pub provider: &'static str,
    pub status: &'static str,
    pub amount: f64,
    pub currency: String,
}

impl EventLine {
    pub fn new(event: &PaymentEvent, kind: EventKind) -> Self {
        let payment = event.payment.clone().unwrap_or_default();
        Self {
            payment_id: payment.id,
            event_type: kind,
            provider: provider_label(payment.provider),
            status: status_label(payment.status),
            amount: payment.amount,
            currency: payment.currency,
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryLine {
    total: u64,
    new: u64,
    existing: u64,
    elapsed_secs: f64,
}

impl From<&SessionReport> for SummaryLine {
    fn from(report: &SessionReport) -> Self {
        Self {
            total: report.total,
            new: report.new,
            existing: report.existing,
            elapsed_secs: report.elapsed.as_secs_f64(),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

pub fn render_event(format: OutputFormat, line: &EventLine) -> String {
    match format {
        OutputFormat::Simple => format!(
            "[{:<8}] {} | {} | {} | {:.2} {}",
            line.event_type.as_str(),
            line.payment_id,
            line.provider,
            line.status,
            line.amount,
            line.currency
        ),
        OutputFormat::Detailed => format!(
            "Payment {}\n  Event:    {}\n  Provider: {}\n  Status:   {}\n  Amount:   {:.2} {}",
            line.payment_id,
            line.event_type.as_str(),
            line.provider,
            line.status,
            line.amount,
            line.currency
        ),
        OutputFormat::Json => to_json(line),
    }
}

pub fn render_summary(format: OutputFormat, report: &SessionReport) -> String {
    match format {
        OutputFormat::Json => to_json(&SummaryLine::from(report)),
        OutputFormat::Simple | OutputFormat::Detailed => format!(
            "SESSION STATS\n  Total Payments: {}\n  Existing:       {}\n  New:            {}\n  Duration:       {:.1}s",
            report.total,
            report.existing,
            report.new,
            report.elapsed.as_secs_f64()
        ),
    }
}

pub fn render_payment(format: OutputFormat, payment: &Payment) -> String {
    match format {
        OutputFormat::Json => to_json(&PaymentLine::from(payment)),
        OutputFormat::Simple => format!(
            "{} | {} | {} | {:.2} {} | {}",
            payment.id,
            provider_label(payment.provider),
            status_label(payment.status),
            payment.amount,
            payment.currency,
            payment.customer_email
        ),
        OutputFormat::Detailed => {
            let mut metadata = payment.metadata.iter().collect::<Vec<_>>();
            metadata.sort();
            let mut out = format!(
                "Payment {}\n  Provider:  {}\n  Status:    {}\n  Amount:    {:.2} {}\n  Customer:  {}\n  Created:   {}\n  Processed: {}",
                payment.id,
                provider_label(payment.provider),
                status_label(payment.status),
                payment.amount,
                payment.currency,
                payment.customer_email,
                payment.created_at,
                payment.processed_at
            );
            for (key, value) in metadata {
                out.push_str(&format!("\n  {key}: {value}"));
            }
            out
        }
    }
}

#[derive(Debug, Serialize)]
struct PaymentLine<'a> {
    id: &'a str,
    provider: &'static str,
    status: &'static str,
    amount: f64,
    currency: &'a str,
    customer_email: &'a str,
    created_at: i64,
    processed_at: i64,
    metadata: &'a std::collections::HashMap<String, String>,
}

impl<'a> From<&'a Payment> for PaymentLine<'a> {
    fn from(payment: &'a Payment) -> Self {
        Self {
            id: &payment.id,
            provider: provider_label(payment.provider),
            status: status_label(payment.status),
            amount: payment.amount,
            currency: &payment.currency,
            customer_email: &payment.customer_email,
            created_at: payment.created_at,
            processed_at: payment.processed_at,
            metadata: &payment.metadata,
        }
    }
}

/// Receives everything the client shows to the user.
pub trait Presenter {
    fn present_event(&mut self, line: &EventLine);
    fn present_summary(&mut self, report: &SessionReport);
    fn present_payment(&mut self, payment: &Payment);
}

impl<P: Presenter + ?Sized> Presenter for &mut P {
    fn present_event(&mut self, line: &EventLine) {
        (**self).present_event(line)
    }

    fn present_summary(&mut self, report: &SessionReport) {
        (**self).present_summary(report)
    }

    fn present_payment(&mut self, payment: &Payment) {
        (**self).present_payment(payment)
    }
}

/// Prints to stdout.
#[derive(Clone, Copy, Debug)]
pub struct ConsolePresenter {
    format: OutputFormat,
}

impl ConsolePresenter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl Presenter for ConsolePresenter {
    fn present_event(&mut self, line: &EventLine) {
        println!("{}", render_event(self.format, line));
    }

    fn present_summary(&mut self, report: &SessionReport) {
        println!("{}", render_summary(self.format, report));
    }

    fn present_payment(&mut self, payment: &Payment) {
        println!("{}", render_payment(self.format, payment));
    }
}
