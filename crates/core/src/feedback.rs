//! Coaching feedback: the structured object the language model must
//! produce, the prompt and response schema sent to it, and the parsing
//! that turns its raw text back into [`Feedback`].

use serde::{Deserialize, Serialize};

use crate::metrics::SummaryMetrics;
use crate::types::DbId;

/// Structured coaching feedback cached on a completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub tips: Vec<String>,
    pub focus_area: String,
    #[serde(default)]
    pub recommended_drills: Vec<DbId>,
}

/// A drill the model may recommend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillCandidate {
    pub id: DbId,
    pub title: String,
    pub focus_area: Option<String>,
}

/// Input to feedback generation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRequest {
    pub stroke_type: Option<String>,
    pub metrics: SummaryMetrics,
}

// ---------------------------------------------------------------------------
// Degraded results
// ---------------------------------------------------------------------------

/// Why a best-effort explanatory feedback was returned instead of a
/// generated one. Degraded feedback is never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// No language-model credential configured.
    NotConfigured,
    /// The model could not be reached or returned an error.
    Unavailable,
    /// The model answered with something that is not a feedback object.
    Unparseable,
}

impl DegradedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DegradedReason::NotConfigured => "not_configured",
            DegradedReason::Unavailable => "unavailable",
            DegradedReason::Unparseable => "unparseable",
        }
    }
}

impl Feedback {
    /// Explanatory feedback shown when generation could not produce a real one.
    pub fn degraded(reason: DegradedReason) -> Self {
        let (weaknesses, tips, focus_area) = match reason {
            DegradedReason::NotConfigured => (
                vec!["Feedback generation is not configured".to_string()],
                vec!["Set GEMINI_API_KEY on the backend to enable coaching feedback.".to_string()],
                "Configuration",
            ),
            DegradedReason::Unavailable => (
                vec!["Feedback service unavailable".to_string()],
                vec!["Please try again later.".to_string()],
                "System Error",
            ),
            DegradedReason::Unparseable => (
                vec!["Error reading generated feedback".to_string()],
                vec!["Please try again later.".to_string()],
                "System Error",
            ),
        };
        Self {
            strengths: Vec::new(),
            weaknesses,
            tips,
            focus_area: focus_area.to_string(),
            recommended_drills: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt and schema
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str = "\
You are an expert tennis coach. Analyze biomechanical data from a tennis \
player and give actionable, encouraging and technical feedback. Keep the tone \
professional and concise and use tennis terminology correctly.

Respond with a JSON object containing:
- strengths: 1-3 things the player did well
- weaknesses: 1-3 major issues detected
- tips: 1-3 actionable tips to correct the issues
- focus_area: one specific area to focus on (e.g. 'Racket Preparation', 'Knee Bend')
- recommended_drills: drill IDs taken only from the available list";

/// Build the prompt text for one feedback request.
///
/// Metric values are the summary means in degrees. The drill section is
/// omitted when the knowledge base has no candidates.
pub fn build_prompt(request: &FeedbackRequest, candidates: &[DrillCandidate]) -> String {
    let stroke = request.stroke_type.as_deref().unwrap_or("Unknown");
    let metrics = serde_json::to_string_pretty(&request.metrics).unwrap_or_else(|_| "{}".into());

    let mut prompt = format!(
        "{SYSTEM_PROMPT}\n\nAnalyze this tennis stroke:\nStroke: {stroke}\nMetrics (mean joint angles in degrees):\n{metrics}\n"
    );

    if !candidates.is_empty() {
        prompt.push_str("\nAvailable drills in the knowledge base:\n");
        for drill in candidates {
            let focus = drill.focus_area.as_deref().unwrap_or("General");
            prompt.push_str(&format!("- {} (ID: {}, Focus: {})\n", drill.title, drill.id, focus));
        }
        prompt.push_str(
            "\nRecommend 1-2 of these drills if relevant, listing their exact IDs in recommended_drills.\n",
        );
    }

    prompt
}

/// Structured-output schema the model must follow.
pub fn response_schema() -> serde_json::Value {
    let string_list = serde_json::json!({ "type": "ARRAY", "items": { "type": "STRING" } });
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "strengths": string_list,
            "weaknesses": string_list,
            "tips": string_list,
            "focus_area": { "type": "STRING" },
            "recommended_drills": string_list,
        },
        "required": ["strengths", "weaknesses", "tips", "focus_area", "recommended_drills"],
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FeedbackParseError {
    #[error("response contains no JSON object")]
    NoJsonObject,

    #[error("response does not match the feedback shape: {0}")]
    Shape(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct RawFeedback {
    strengths: Vec<String>,
    weaknesses: Vec<String>,
    tips: Vec<String>,
    focus_area: String,
    #[serde(default)]
    recommended_drills: Vec<String>,
}

/// Locate the outermost JSON object in a model response, tolerating code
/// fences and leading prose.
fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

/// Parse raw model output into [`Feedback`].
///
/// Recommended drill ids the model invented (not in `candidates`, or not a
/// valid id at all) are dropped.
pub fn parse_response(
    response: &str,
    candidates: &[DrillCandidate],
) -> Result<Feedback, FeedbackParseError> {
    let json = extract_json_object(response).ok_or(FeedbackParseError::NoJsonObject)?;
    let raw: RawFeedback = serde_json::from_str(json)?;

    let mut recommended_drills = Vec::new();
    for id in raw.recommended_drills {
        let Ok(id) = id.trim().parse::<DbId>() else {
            continue;
        };
        if candidates.iter().any(|c| c.id == id) && !recommended_drills.contains(&id) {
            recommended_drills.push(id);
        }
    }

    Ok(Feedback {
        strengths: raw.strengths,
        weaknesses: raw.weaknesses,
        tips: raw.tips,
        focus_area: raw.focus_area,
        recommended_drills,
    })
}
