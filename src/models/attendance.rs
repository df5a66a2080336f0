use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attendance for one course, as shown on the portal plus derived targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicRecord {
    pub course_code: String,
    pub subject_name: String,
    pub course_type: String,
    pub course_category: String,
    pub total_conducted: u32,
    pub attended: u32,
    pub percentage: f64,
    pub status: String,
    /// Classes that must still be attended to reach 75%.
    #[serde(rename = "classesNeededFor75")]
    pub classes_needed_for_75: u32,
    /// Classes that can be missed while staying at or above 75%.
    pub classes_available_to_skip: u32,
}

/// Aggregate of the biometric day log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricSummary {
    pub total_days: u32,
    pub present_days: u32,
    pub percentage: f64,
    #[serde(rename = "classesNeededFor75")]
    pub classes_needed_for_75: u32,
    pub classes_available_to_skip: u32,
}

/// One successful fetch for one identifier.
///
/// Replaced wholesale by the next successful fetch, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub identifier: String,
    pub academic: Vec<AcademicRecord>,
    pub biometric: BiometricSummary,
    pub fetched_at: DateTime<Utc>,
}
