mod common;

use anyhow::Result;
use common::Harness;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use mets_leads_backend::error::AppError;
use mets_leads_backend::models::{CampaignStatus, LeadStatus};
use mets_leads_backend::services::events::EventKind;
use mets_leads_backend::services::ingestion::{CampaignPayload, IngestionService, LeadPayload};
use mets_leads_backend::services::leads::{LeadService, LeadUpdate};
use mets_leads_backend::store::EntityStore;

fn ingestion(harness: &Harness) -> IngestionService {
    IngestionService::new(harness.store(), harness.events(), harness.config.clone())
}

fn campaign(external_id: &str) -> CampaignPayload {
    CampaignPayload {
        external_id: external_id.to_string(),
        name: "Winter promo".to_string(),
        external_ad_account_id: Some("act_1".to_string()),
        description: None,
        platform: None,
        status: None,
    }
}

fn lead(external_id: &str, campaign: Option<&str>) -> LeadPayload {
    LeadPayload {
        external_id: external_id.to_string(),
        name: "Thandi Mokoena".to_string(),
        phone: "082 123 4567".to_string(),
        email: Some(" Thandi@Example.com ".to_string()),
        campaign_external_id: campaign.map(str::to_string),
    }
}

async fn campaign_total(harness: &Harness, org: Uuid, campaign_id: Uuid) -> Result<i64> {
    let campaign = harness
        .store
        .get_campaign(org, campaign_id)
        .await?
        .expect("campaign exists");
    Ok(campaign.metrics.total_leads)
}

#[tokio::test]
async fn replayed_lead_is_stored_once() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;
    let service = ingestion(&harness);

    let camp = service.ingest_campaign(org, campaign("camp_42")).await?;
    assert!(camp.created);
    assert_eq!(camp.campaign.metrics.total_leads, 0);

    let first = service.ingest_lead(org, lead("fb_lead_1", Some("camp_42"))).await?;
    assert!(first.created);
    assert_eq!(first.lead.campaign_id, Some(camp.campaign.id));
    assert_eq!(first.lead.phone, "27821234567");
    assert_eq!(first.lead.email.as_deref(), Some("thandi@example.com"));
    assert_eq!(first.lead.status, LeadStatus::New);
    assert_eq!(campaign_total(&harness, org, camp.campaign.id).await?, 1);

    let replay = service.ingest_lead(org, lead("fb_lead_1", Some("camp_42"))).await?;
    assert!(!replay.created);
    assert_eq!(replay.lead.id, first.lead.id);
    assert_eq!(campaign_total(&harness, org, camp.campaign.id).await?, 1);
    assert_eq!(harness.store.lead_count(), 1);
    assert_eq!(harness.events.count(EventKind::LeadIngested), 1);

    Ok(())
}

#[tokio::test]
async fn new_lead_scenario() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("org1").await?;
    let service = ingestion(&harness);
    let camp = service.ingest_campaign(org, campaign("camp_42")).await?;

    let payload = LeadPayload {
        external_id: "fb_lead_999".to_string(),
        name: "Jane Doe".to_string(),
        phone: "+15551234567".to_string(),
        email: None,
        campaign_external_id: Some("camp_42".to_string()),
    };

    let first = assert_ok!(service.ingest_lead(org, payload.clone()).await);
    assert!(first.created);
    assert_eq!(first.lead.status, LeadStatus::New);
    assert_eq!(first.lead.phone, "15551234567");
    assert_eq!(campaign_total(&harness, org, camp.campaign.id).await?, 1);

    let second = assert_ok!(service.ingest_lead(org, payload).await);
    assert!(!second.created);
    assert_eq!(second.lead, first.lead);
    assert_eq!(campaign_total(&harness, org, camp.campaign.id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn replay_keeps_staff_edits() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;
    let service = ingestion(&harness);

    let first = service.ingest_lead(org, lead("fb_lead_1", None)).await?;
    LeadService::new(harness.store(), harness.events())
        .update_lead(
            org,
            first.lead.id,
            LeadUpdate {
                status: Some(LeadStatus::Qualified),
                note: Some("call after 5pm".to_string()),
            },
        )
        .await?;

    let replay = service.ingest_lead(org, lead("fb_lead_1", None)).await?;
    assert!(!replay.created);
    assert_eq!(replay.lead.status, LeadStatus::Qualified);
    assert_eq!(replay.lead.note.as_deref(), Some("call after 5pm"));

    Ok(())
}

#[tokio::test]
async fn lead_owned_by_another_organization_is_rejected() -> Result<()> {
    let harness = Harness::new();
    let acme = harness.organization("Acme").await?;
    let globex = harness.organization("Globex").await?;
    let service = ingestion(&harness);

    service.ingest_lead(acme, lead("fb_lead_1", None)).await?;
    let err = assert_err!(service.ingest_lead(globex, lead("fb_lead_1", None)).await);

    assert!(matches!(err, AppError::CrossTenantLead(ref id) if id == "fb_lead_1"));
    assert_eq!(harness.store.lead_count(), 1);

    Ok(())
}

#[tokio::test]
async fn concurrent_deliveries_create_one_lead() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;
    let service = ingestion(&harness);
    let camp = service.ingest_campaign(org, campaign("camp_42")).await?;

    let (a, b) = tokio::join!(
        service.ingest_lead(org, lead("fb_lead_race", Some("camp_42"))),
        service.ingest_lead(org, lead("fb_lead_race", Some("camp_42"))),
    );
    let (a, b) = (a?, b?);

    assert_ne!(a.created, b.created, "exactly one delivery creates the lead");
    assert_eq!(a.lead.id, b.lead.id);
    assert_eq!(harness.store.lead_count(), 1);
    assert_eq!(campaign_total(&harness, org, camp.campaign.id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn concurrent_campaign_deliveries_create_one_campaign() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;
    let service = ingestion(&harness);

    let (a, b) = tokio::join!(
        service.ingest_campaign(org, campaign("camp_7")),
        service.ingest_campaign(org, campaign("camp_7")),
    );
    let (a, b) = (a?, b?);

    assert_ne!(a.created, b.created);
    assert_eq!(a.campaign.id, b.campaign.id);
    assert_eq!(harness.store.list_campaigns(org).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn recompute_repairs_drifted_counters() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;
    let service = ingestion(&harness);
    let camp = service.ingest_campaign(org, campaign("camp_42")).await?;

    let converted = service.ingest_lead(org, lead("fb_1", Some("camp_42"))).await?;
    service.ingest_lead(org, lead("fb_2", Some("camp_42"))).await?;
    LeadService::new(harness.store(), harness.events())
        .update_lead(
            org,
            converted.lead.id,
            LeadUpdate {
                status: Some(LeadStatus::Converted),
                note: None,
            },
        )
        .await?;

    harness.store.corrupt_metrics(camp.campaign.id, 99);

    let repaired = service
        .recompute_campaign_metrics(org, camp.campaign.id)
        .await?;
    assert_eq!(repaired.metrics.total_leads, 2);
    assert_eq!(repaired.metrics.contacted_leads, 1);
    assert_eq!(repaired.metrics.converted_leads, 1);

    let all = service.recompute_organization_metrics(org).await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].metrics.total_leads, 2);
    assert_eq!(all[0].metrics.converted_leads, 1);

    Ok(())
}

#[tokio::test]
async fn status_changes_move_campaign_counters() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;
    let service = ingestion(&harness);
    let camp = service.ingest_campaign(org, campaign("camp_42")).await?;
    let ingested = service.ingest_lead(org, lead("fb_1", Some("camp_42"))).await?;
    let leads = LeadService::new(harness.store(), harness.events());

    let set = |status| LeadUpdate {
        status: Some(status),
        note: None,
    };

    leads.update_lead(org, ingested.lead.id, set(LeadStatus::Converted)).await?;
    let metrics = harness
        .store
        .get_campaign(org, camp.campaign.id)
        .await?
        .expect("campaign exists")
        .metrics;
    assert_eq!((metrics.total_leads, metrics.contacted_leads, metrics.converted_leads), (1, 1, 1));

    leads.update_lead(org, ingested.lead.id, set(LeadStatus::Lost)).await?;
    let metrics = harness
        .store
        .get_campaign(org, camp.campaign.id)
        .await?
        .expect("campaign exists")
        .metrics;
    assert_eq!((metrics.total_leads, metrics.contacted_leads, metrics.converted_leads), (1, 0, 0));

    Ok(())
}

#[tokio::test]
async fn invalid_leads_are_rejected() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;
    let service = ingestion(&harness);

    let mut no_phone = lead("fb_1", None);
    no_phone.phone = " - ".to_string();
    assert!(matches!(
        service.ingest_lead(org, no_phone).await,
        Err(AppError::Validation(_))
    ));

    let mut no_name = lead("fb_2", None);
    no_name.name = "   ".to_string();
    assert!(matches!(
        service.ingest_lead(org, no_name).await,
        Err(AppError::Validation(_))
    ));

    assert!(matches!(
        service.ingest_lead(org, lead("  ", None)).await,
        Err(AppError::Validation(_))
    ));
    assert_eq!(harness.store.lead_count(), 0);

    Ok(())
}

#[tokio::test]
async fn unknown_campaign_reference_leaves_lead_unattached() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;

    let ingested = ingestion(&harness)
        .ingest_lead(org, lead("fb_1", Some("camp_missing")))
        .await?;
    assert!(ingested.created);
    assert_eq!(ingested.lead.campaign_id, None);

    Ok(())
}

#[tokio::test]
async fn batch_reports_each_record() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;

    let mut bad = lead("fb_bad", None);
    bad.phone = String::new();

    let report = ingestion(&harness)
        .ingest_leads(org, vec![lead("fb_1", None), lead("fb_1", None), bad])
        .await?;

    assert_eq!(report.created, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].external_id, "fb_bad");

    let organization = harness.store.get_organization(org).await?.expect("org exists");
    assert!(organization.integrations.meta.meta_last_sync.is_some());

    Ok(())
}

#[tokio::test]
async fn batch_for_unknown_organization_fails_whole() -> Result<()> {
    let harness = Harness::new();

    let result = ingestion(&harness)
        .ingest_leads(Uuid::new_v4(), vec![lead("fb_1", None)])
        .await;

    assert!(matches!(result, Err(AppError::OrganizationNotFound)));
    assert_eq!(harness.store.lead_count(), 0);
    Ok(())
}

#[tokio::test]
async fn replayed_campaign_syncs_platform_status() -> Result<()> {
    let harness = Harness::new();
    let org = harness.organization("Acme").await?;
    let service = ingestion(&harness);

    let first = service.ingest_campaign(org, campaign("camp_42")).await?;
    assert_eq!(first.campaign.status, CampaignStatus::Active);

    let mut paused = campaign("camp_42");
    paused.name = "Renamed upstream".to_string();
    paused.status = Some(CampaignStatus::Paused);
    let replay = service.ingest_campaign(org, paused).await?;

    assert!(!replay.created);
    assert_eq!(replay.campaign.id, first.campaign.id);
    assert_eq!(replay.campaign.status, CampaignStatus::Paused);
    assert_eq!(replay.campaign.name, "Winter promo");

    Ok(())
}
