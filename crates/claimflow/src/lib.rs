//! Dossier lifecycle engine for multi-party reimbursement claims.
//!
//! The crate is organised around one workflow: a client's claim ("dossier")
//! travels through eligibility vetting, expert assignment, charter signature,
//! document exchange, audit, administrative decision, and finally a cascading
//! commission settlement between client, expert, platform, and referral
//! partner. `workflows::dossier` hosts the state machine, the waterfall
//! commission calculator, the merged timeline, and the notification fan-out.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
