//! Request/response types for profile endpoints.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::storage::ProfileRecord;

/// Document-upload path fields shared by create, update, and responses.
///
/// The service stores only the paths; the files live in external storage.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct ProfileDocuments {
    pub profile_pic: Option<String>,
    pub tenth_cert: Option<String>,
    pub twelfth_cert: Option<String>,
    pub appointment_order: Option<String>,
    pub joining_report: Option<String>,
    pub ug_degree: Option<String>,
    pub pg_ms_consolidated: Option<String>,
    pub phd_degree: Option<String>,
    pub journals_list: Option<String>,
    pub conferences_list: Option<String>,
    pub au_supervisor_letter: Option<String>,
    pub fdp_workshops_webinars: Option<String>,
    pub nptel_coursera: Option<String>,
    pub invited_talks: Option<String>,
    pub projects_sanction: Option<String>,
    pub consultancy: Option<String>,
    pub patent: Option<String>,
    pub community_cert: Option<String>,
    pub aadhar: Option<String>,
    pub pan: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ProfileCreateRequest {
    /// Defaults to the acting user; managers may create for someone else.
    pub user_id: Option<Uuid>,
    pub name: String,
    pub department: Option<String>,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub qualifications: Option<String>,
    pub experience: Option<String>,
    pub research: Option<String>,
    pub date_of_joining: Option<NaiveDate>,
    #[serde(flatten)]
    pub documents: ProfileDocuments,
}

/// Partial update; omitted fields keep their stored values.
#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct ProfileUpdateRequest {
    pub name: Option<String>,
    pub department: Option<String>,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub qualifications: Option<String>,
    pub experience: Option<String>,
    pub research: Option<String>,
    pub date_of_joining: Option<NaiveDate>,
    #[serde(flatten)]
    pub documents: ProfileDocuments,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ProfileResponse {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub department: Option<String>,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub qualifications: Option<String>,
    pub experience: Option<String>,
    pub research: Option<String>,
    pub date_of_joining: Option<NaiveDate>,
    #[serde(flatten)]
    pub documents: ProfileDocuments,
    pub is_locked: bool,
    pub lock_expires_at: Option<String>,
    /// Whether the lock currently blocks writes. A stale lock reports
    /// `is_locked = true` with `lock_active = false`.
    pub lock_active: bool,
    pub edit_requested: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl ProfileResponse {
    #[must_use]
    pub fn from_record(record: ProfileRecord) -> Self {
        let now = chrono::Utc::now();
        let lock_active =
            super::policy::lock_active(record.is_locked, record.lock_expires_at, now);
        Self {
            id: record.id.to_string(),
            user_id: record.user_id.to_string(),
            name: record.name,
            department: record.department,
            title: record.title,
            bio: record.bio,
            qualifications: record.qualifications,
            experience: record.experience,
            research: record.research,
            date_of_joining: record.date_of_joining,
            documents: ProfileDocuments {
                profile_pic: record.profile_pic,
                tenth_cert: record.tenth_cert,
                twelfth_cert: record.twelfth_cert,
                appointment_order: record.appointment_order,
                joining_report: record.joining_report,
                ug_degree: record.ug_degree,
                pg_ms_consolidated: record.pg_ms_consolidated,
                phd_degree: record.phd_degree,
                journals_list: record.journals_list,
                conferences_list: record.conferences_list,
                au_supervisor_letter: record.au_supervisor_letter,
                fdp_workshops_webinars: record.fdp_workshops_webinars,
                nptel_coursera: record.nptel_coursera,
                invited_talks: record.invited_talks,
                projects_sanction: record.projects_sanction,
                consultancy: record.consultancy,
                patent: record.patent,
                community_cert: record.community_cert,
                aadhar: record.aadhar,
                pan: record.pan,
            },
            is_locked: record.is_locked,
            lock_expires_at: record.lock_expires_at.map(|ts| ts.to_rfc3339()),
            lock_active,
            edit_requested: record.edit_requested,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct LockRequest {
    pub lock: bool,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LockAllResponse {
    pub affected: u64,
}
