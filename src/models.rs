use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmploymentType {
    #[serde(rename = "FULLTIME")]
    FullTime,
    #[serde(rename = "CONTRACTOR")]
    Contractor,
    #[serde(rename = "PARTTIME")]
    PartTime,
    #[serde(rename = "INTERN")]
    Intern,
}

impl EmploymentType {
    pub const ALL: [EmploymentType; 4] = [
        EmploymentType::FullTime,
        EmploymentType::Contractor,
        EmploymentType::PartTime,
        EmploymentType::Intern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmploymentType::FullTime => "FULLTIME",
            EmploymentType::Contractor => "CONTRACTOR",
            EmploymentType::PartTime => "PARTTIME",
            EmploymentType::Intern => "INTERN",
        }
    }
}

impl fmt::Display for EmploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EmploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace(['-', '_', ' '], "").as_str() {
            "FULLTIME" => Ok(EmploymentType::FullTime),
            "CONTRACTOR" => Ok(EmploymentType::Contractor),
            "PARTTIME" => Ok(EmploymentType::PartTime),
            "INTERN" => Ok(EmploymentType::Intern),
            _ => Err(format!(
                "Unknown employment type '{}'. Available: FULLTIME, CONTRACTOR, PARTTIME, INTERN",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperienceLevel {
    #[serde(rename = "under_3_years_experience")]
    UnderThreeYears,
    #[serde(rename = "more_than_3_years_experience")]
    MoreThanThreeYears,
    #[serde(rename = "no_experience")]
    NoExperience,
    #[serde(rename = "no_degree")]
    NoDegree,
}

impl ExperienceLevel {
    pub const ALL: [ExperienceLevel; 4] = [
        ExperienceLevel::UnderThreeYears,
        ExperienceLevel::MoreThanThreeYears,
        ExperienceLevel::NoExperience,
        ExperienceLevel::NoDegree,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceLevel::UnderThreeYears => "under_3_years_experience",
            ExperienceLevel::MoreThanThreeYears => "more_than_3_years_experience",
            ExperienceLevel::NoExperience => "no_experience",
            ExperienceLevel::NoDegree => "no_degree",
        }
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ExperienceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "under_3_years_experience" | "under3" => Ok(ExperienceLevel::UnderThreeYears),
            "more_than_3_years_experience" | "over3" => Ok(ExperienceLevel::MoreThanThreeYears),
            "no_experience" => Ok(ExperienceLevel::NoExperience),
            "no_degree" => Ok(ExperienceLevel::NoDegree),
            _ => Err(format!(
                "Unknown experience level '{}'. Available: under_3_years_experience, \
                 more_than_3_years_experience, no_experience, no_degree",
                s
            )),
        }
    }
}

/// How far back the upstream source looks for postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatePosted {
    #[default]
    All,
    Today,
    ThreeDays,
    Week,
    Month,
}

impl DatePosted {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatePosted::All => "all",
            DatePosted::Today => "today",
            DatePosted::ThreeDays => "3days",
            DatePosted::Week => "week",
            DatePosted::Month => "month",
        }
    }
}

impl FromStr for DatePosted {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(DatePosted::All),
            "today" => Ok(DatePosted::Today),
            "3days" => Ok(DatePosted::ThreeDays),
            "week" => Ok(DatePosted::Week),
            "month" => Ok(DatePosted::Month),
            _ => Err(format!(
                "Unknown date scope '{}'. Available: all, today, 3days, week, month",
                s
            )),
        }
    }
}

/// One search result row. Field names on the wire match both the job-search
/// API and the `saved_jobs` table columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(rename = "job_id")]
    pub id: String,
    #[serde(rename = "job_title")]
    pub title: String,
    pub employer_name: String,
    pub employer_logo: Option<String>,
    #[serde(rename = "job_employment_type")]
    pub employment_type: EmploymentType,
    #[serde(rename = "job_posted_at_datetime_utc")]
    pub posted_at: DateTime<Utc>,
    #[serde(rename = "job_city")]
    pub city: Option<String>,
    #[serde(rename = "job_country")]
    pub country: Option<String>,
}

impl JobSummary {
    pub fn location(&self) -> Option<String> {
        join_location(&[self.city.as_deref(), self.country.as_deref()])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobHighlights {
    #[serde(rename = "Qualifications", default)]
    pub qualifications: Vec<String>,
    #[serde(rename = "Responsibilities", default)]
    pub responsibilities: Vec<String>,
    #[serde(rename = "Benefits", default)]
    pub benefits: Vec<String>,
}

impl JobHighlights {
    pub fn is_empty(&self) -> bool {
        self.qualifications.is_empty() && self.responsibilities.is_empty() && self.benefits.is_empty()
    }
}

/// A single job as returned by the details endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDetail {
    pub summary: JobSummary,
    pub description: String,
    pub state: Option<String>,
    pub apply_link: Option<String>,
    pub highlights: JobHighlights,
}

impl JobDetail {
    pub fn to_summary(&self) -> JobSummary {
        self.summary.clone()
    }

    pub fn location(&self) -> Option<String> {
        join_location(&[
            self.summary.city.as_deref(),
            self.state.as_deref(),
            self.summary.country.as_deref(),
        ])
    }
}

/// A persisted `saved_jobs` row: the denormalized summary plus the row id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedJob {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub job: JobSummary,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Row ids come back as uuids or bigints depending on the table definition.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id: {}", other))),
    }
}

fn join_location(parts: &[Option<&str>]) -> Option<String> {
    let parts: Vec<&str> = parts
        .iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

// --- Boundary mapping from the loosely-typed upstream JSON ---

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJob {
    job_id: Option<String>,
    job_title: Option<String>,
    employer_name: Option<String>,
    employer_logo: Option<String>,
    job_employment_type: Option<String>,
    job_posted_at_datetime_utc: Option<String>,
    job_city: Option<String>,
    job_state: Option<String>,
    job_country: Option<String>,
    job_description: Option<String>,
    job_apply_link: Option<String>,
    job_highlights: Option<JobHighlights>,
}

fn required(value: Option<String>, field: &str) -> Result<String, Error> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation(format!("missing {}", field)))
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl RawJob {
    fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(value).map_err(|e| Error::Validation(e.to_string()))
    }

    fn into_summary(self) -> Result<(JobSummary, RawDetailFields), Error> {
        let id = required(self.job_id, "job_id")?;
        let title = required(self.job_title, "job_title")?;
        let employer_name = required(self.employer_name, "employer_name")?;
        let employment_type = required(self.job_employment_type, "job_employment_type")?
            .parse::<EmploymentType>()
            .map_err(Error::Validation)?;
        let posted_raw = required(self.job_posted_at_datetime_utc, "job_posted_at_datetime_utc")?;
        let posted_at = DateTime::parse_from_rfc3339(&posted_raw)
            .map_err(|e| Error::Validation(format!("job_posted_at_datetime_utc '{}': {}", posted_raw, e)))?
            .with_timezone(&Utc);

        let summary = JobSummary {
            id,
            title,
            employer_name,
            employer_logo: optional(self.employer_logo),
            employment_type,
            posted_at,
            city: optional(self.job_city),
            country: optional(self.job_country),
        };
        let rest = RawDetailFields {
            description: self.job_description.unwrap_or_default(),
            state: optional(self.job_state),
            apply_link: optional(self.job_apply_link),
            highlights: self.job_highlights.unwrap_or_default(),
        };
        Ok((summary, rest))
    }
}

struct RawDetailFields {
    description: String,
    state: Option<String>,
    apply_link: Option<String>,
    highlights: JobHighlights,
}

/// Validate one upstream search record. Records missing a required field or
/// carrying an unknown employment type are rejected.
pub fn summary_from_value(value: serde_json::Value) -> Result<JobSummary, Error> {
    RawJob::from_value(value)?.into_summary().map(|(summary, _)| summary)
}

pub fn detail_from_value(value: serde_json::Value) -> Result<JobDetail, Error> {
    let (summary, rest) = RawJob::from_value(value)?.into_summary()?;
    Ok(JobDetail {
        summary,
        description: rest.description,
        state: rest.state,
        apply_link: rest.apply_link,
        highlights: rest.highlights,
    })
}

#[derive(Debug, Deserialize)]
struct RawSavedRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

/// Validate one `saved_jobs` row. Rows are copies of search records taken at
/// save time, so they get the same checks as fresh records.
pub fn saved_from_value(value: serde_json::Value) -> Result<SavedJob, Error> {
    let row = RawSavedRow::deserialize(&value).map_err(|e| Error::Validation(e.to_string()))?;
    let job = summary_from_value(value)?;
    let created_at = row
        .created_at
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    Ok(SavedJob {
        id: required(Some(row.id), "id")?,
        user_id: optional(row.user_id),
        job,
        created_at,
    })
}
