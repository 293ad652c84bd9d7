use crate::infra::{
    InMemoryCommentStore, InMemoryDossierRepository, InMemoryInvoiceStore, InMemoryMeetingStore,
    InMemoryTimelineStore, LoggingNotificationChannel, RecordActorDirectory,
};
use chrono::Utc;
use clap::Args;
use std::sync::Arc;

use claimflow::config::BillingConfig;
use claimflow::error::AppError;
use claimflow::workflows::dossier::LifecycleError;
use claimflow::workflows::dossier::repository::DossierRepository;
use claimflow::workflows::dossier::{
    ActorContext, ActorRole, ClientRef, Dossier, DossierId, DossierLifecycleService, DossierStatus,
    ExpertRef, ReferrerRef, StatusRegistry, TimelineFilter, TimelineLog, TransitionPayload,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Claimed amount from the eligibility simulation (EUR)
    #[arg(long, default_value_t = 10_000.0)]
    pub(crate) claimed_amount: f64,
    /// Audited amount the expert identifies (EUR)
    #[arg(long, default_value_t = 5_200.0)]
    pub(crate) final_amount: f64,
    /// Include a referral partner with a 10% share of the platform fee
    #[arg(long)]
    pub(crate) with_referrer: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let repository = Arc::new(InMemoryDossierRepository::default());
    let service = DossierLifecycleService::new(
        repository.clone(),
        Arc::new(LoggingNotificationChannel),
        Arc::new(StatusRegistry::standard()),
        Arc::new(TimelineLog::new(
            Arc::new(InMemoryTimelineStore::default()),
            Arc::new(InMemoryCommentStore::default()),
            Arc::new(InMemoryMeetingStore::default()),
        )),
        Arc::new(InMemoryInvoiceStore::new("FACT")),
        Arc::new(RecordActorDirectory),
        BillingConfig {
            invoice_prefix: "FACT".to_string(),
            reminder_after_days: 7,
        },
    );

    let id = DossierId("demo-1".to_string());
    let mut dossier = Dossier::new(
        id.clone(),
        ClientRef {
            id: "client-1".to_string(),
            auth_id: "claire@exemple.fr".to_string(),
            display_name: "Claire Martin".to_string(),
        },
        "TICPE",
        args.claimed_amount,
        Utc::now(),
    );
    dossier.expert = Some(ExpertRef {
        id: "expert-1".to_string(),
        auth_id: "marc@cabinet-petit.fr".to_string(),
        display_name: "Marc Petit".to_string(),
        client_fee_pct: Some(0.30),
        platform_fee_pct: Some(0.30),
    });
    if args.with_referrer {
        dossier.referrer = Some(ReferrerRef {
            id: "referrer-1".to_string(),
            auth_id: "contact@apport.fr".to_string(),
            display_name: "Apport & Co".to_string(),
            share_pct: Some(0.10),
        });
    }
    repository.insert(dossier).map_err(LifecycleError::from)?;

    println!("Dossier lifecycle demo ({} EUR claimed)", args.claimed_amount);

    let client = actor(ActorRole::Client, "client-1", "Claire Martin");
    let expert = actor(ActorRole::Expert, "expert-1", "Marc Petit");
    let admin = actor(ActorRole::Admin, "admin-1", "Sophie Blanc");

    let steps: &[(DossierStatus, &ActorContext)] = &[
        (DossierStatus::PendingAdminValidation, &client),
        (DossierStatus::AdminValidated, &admin),
        (DossierStatus::ExpertAssigned, &client),
        (DossierStatus::ExpertPendingValidation, &client),
        (DossierStatus::ExpertValidated, &expert),
        (DossierStatus::ChartePending, &expert),
        (DossierStatus::CharteSigned, &client),
        (DossierStatus::AuditInProgress, &expert),
    ];
    for (target, by) in steps {
        let receipt =
            service.request_transition(&id, *target, by, &TransitionPayload::default())?;
        println!(
            "- {:<34} step {}/8, {:>3}%",
            target.as_str(),
            receipt.dossier.current_step,
            receipt.dossier.progress
        );
    }

    service.request_transition(
        &id,
        DossierStatus::AuditCompleted,
        &expert,
        &TransitionPayload {
            final_amount: Some(args.final_amount),
            ..TransitionPayload::default()
        },
    )?;
    println!(
        "- {:<34} audited at {:.2} EUR",
        DossierStatus::AuditCompleted.as_str(),
        args.final_amount
    );

    let tail: &[(DossierStatus, &ActorContext)] = &[
        (DossierStatus::Validated, &client),
        (DossierStatus::ImplementationInProgress, &expert),
        (DossierStatus::ImplementationValidated, &expert),
        (DossierStatus::PaymentRequested, &expert),
        (DossierStatus::PaymentInProgress, &client),
        (DossierStatus::RefundCompleted, &client),
    ];
    for (target, by) in tail {
        service.request_transition(&id, *target, by, &TransitionPayload::default())?;
        println!("- {}", target.as_str());
    }

    let invoice = service.commission_final(&id)?;
    println!("\nSettlement {}", invoice.reference);
    if let Some(result) = invoice.result {
        println!("  expert fee        {:>10.2} EUR", result.expert_total_fee);
        println!("  platform fee HT   {:>10.2} EUR", result.platform_fee_ht);
        println!("  VAT               {:>10.2} EUR", result.platform_vat);
        println!("  platform fee TTC  {:>10.2} EUR", result.platform_fee_ttc);
        println!("  referrer share    {:>10.2} EUR", result.referrer_commission);
        println!("  expert retained   {:>10.2} EUR", result.expert_retained);
        println!("  platform retained {:>10.2} EUR", result.platform_retained);
    }

    let page = service.timeline(&id, &TimelineFilter::default())?;
    println!("\nHistory ({} events, newest first)", page.total);
    for event in &page.events {
        println!(
            "  {} [{}] {}",
            event.occurred_at.format("%H:%M:%S"),
            event.actor_name,
            event.title
        );
    }

    Ok(())
}

fn actor(role: ActorRole, actor_id: &str, display_name: &str) -> ActorContext {
    ActorContext {
        role,
        actor_id: actor_id.to_string(),
        display_name: display_name.to_string(),
    }
}
