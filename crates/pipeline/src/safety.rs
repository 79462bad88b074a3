//! Post-generation safety filter.
//!
//! Three outcomes, in escalating order:
//!
//! - [`SafetyVerdict::Safe`]: delivered unchanged
//! - [`SafetyVerdict::Sanitized`]: over-confident claims softened and/or
//!   disclaimers appended; still delivered
//! - [`SafetyVerdict::Unsafe`]: nothing from the model is delivered; the
//!   caller receives [`FALLBACK_MESSAGE`] instead
//!
//! Rewrites are pattern replacements, not classification. Disclaimers are
//! keyword triggered regardless of context.

use auspex_core::security_event::SecurityEventKind;
use auspex_security::SecurityLog;
use regex_lite::{Captures, Regex};
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Static, pre-approved reply used whenever an answer is unsafe.
pub const FALLBACK_MESSAGE: &str = "I'm not able to offer guidance on that right now. \
Astrology is best read as gentle suggestion rather than certainty. If something is weighing \
on you, please consider talking it through with someone you trust or a qualified professional.";

pub const MEDICAL_DISCLAIMER: &str = "Note: Astrological guidance is not medical advice. \
Please consult a qualified healthcare professional about any health concern.";

pub const FINANCIAL_DISCLAIMER: &str = "Note: Astrological guidance is not financial advice. \
Please speak with a licensed financial adviser before making money decisions.";

pub const SUPPORT_NOTE: &str = "If you are going through something painful right now, please \
reach out to someone you trust or a local support line. You do not have to face this alone.";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex")
}

/// Words that pin a claim to a calendar point.
const DATE_WORD: &str = r"(?:mon|tues|wednes|thurs|fri|satur|sun)day|january|february|march|april|may|june|july|august|september|october|november|december|\d{1,2}(?:st|nd|rd|th)?|\d{4}|next|this|the\s+(?:end|start|beginning|middle)";

/// Over-confident phrasing and its hedged replacement, applied in order.
/// Replacements may refer to capture groups (`$1`).
static REWRITES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (re(r"(?i)\bguaranteed to happen\b"), "could possibly happen"),
        (re(r"(?i)\b100\s*%\s*(certain|sure|guaranteed)\b"), "quite possibly"),
        (re(r"(?i)\bwithout (a|any) doubt\b"), "possibly"),
        (re(r"(?i)\b(is|are) (certain|bound|sure) to\b"), "may"),
        (re(r"(?i)\bwill (definitely|certainly|surely|undoubtedly)\b"), "may"),
        (
            re(&format!(
                r"(?i)\bwill ([a-z]+(?:\s+[a-z]+)?)\s+(on|in|by|before|during|within)\s+({DATE_WORD})\b"
            )),
            "may $1 $2 $3",
        ),
        (
            re(r"(?i)\bwill (take place|be held|occur|come|arrive|be)\b"),
            "may $1",
        ),
        (
            re(r"(?i)\b(is|are) going to (take place|be held|happen|occur|come|arrive|be)\b"),
            "may $2",
        ),
        (re(r"(?i)\bdestined to\b"), "may be inclined to"),
        (re(r"(?i)\bwill happen\b"), "may happen"),
        (re(r"(?i)\byou will\b"), "you may"),
        (re(r"(?i)\byou'll\b"), "you may"),
    ]
});

static MEDICAL_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(prescriptions?|medications?|medicines?|meds|diagnos[a-z]*|treatments?|surgery|surgeries|diseases?|illness(es)?|symptoms?|therapy|doctors?|dosage)\b")
});

static FINANCIAL_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(invest[a-z]*|stocks?|shares|crypto[a-z]*|bitcoin|loans?|mortgages?|trading|portfolio|lottery|gambl[a-z]*)\b")
});

static SELF_HARM: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b((kill|hurt|harm|cut|starve)\s+yourself|(end|take)\s+your\s+(own\s+)?life|self[- ]harm\s+(is|can|will)\s+help)\b")
});

static STOP_MEDICATION: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(stop|quit|discontinue|skip|abandon)\s+(taking\s+)?(your\s+|all\s+)?(medications?|medicines?|meds|pills|treatment|therapy)\b")
});

static AVOID_DOCTORS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(avoid|ignore|don'?t\s+(see|visit|trust)|do\s+not\s+(see|visit|trust)|no\s+need\s+(to\s+see|for))\s+(a\s+|the\s+|your\s+|any\s+)?(doctors?|physicians?|therapists?|hospitals?)\b")
});

static DEATH_PREDICTION: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b((you|he|she|they)\s+(will|shall|is\s+going\s+to|are\s+going\s+to)\s+(die|pass\s+away|perish)|(your|his|her|their)\s+death\s+(will|is|shall)|(predict|foresee)\s+(your\s+)?death)\b")
});

static DOOM_LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(doomed|cursed|hopeless|disaster\s+awaits|ruin(ed|ation)?|catastroph[a-z]*|terrible\s+fate|no\s+hope|bad\s+omen)\b")
});

static DISTRESS_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)(suicid|kill\s+myself|end\s+my\s+life|want\s+to\s+die|hopeless|can'?t\s+go\s+on|hurt\s+myself|self[- ]harm|worthless|no\s+reason\s+to\s+live)")
});

static ANXIETY_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(anxious|anxiety|worried|worry|worrying|scared|afraid|nervous|stressed|panic(king)?|fear(ful)?|tense|restless)\b")
});

/// The caller's emotional state, inferred from their message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    Calm,
    Anxious,
    Distressed,
}

impl EmotionalState {
    /// Keyword classification of the (sanitized) user message.
    pub fn detect(message: &str) -> Self {
        if DISTRESS_MARKERS.is_match(message) {
            EmotionalState::Distressed
        } else if ANXIETY_MARKERS.is_match(message) {
            EmotionalState::Anxious
        } else {
            EmotionalState::Calm
        }
    }
}

/// Result of filtering one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SafetyVerdict {
    Safe { text: String },
    Sanitized { text: String, reasons: Vec<String> },
    Unsafe { reason: String },
}

impl SafetyVerdict {
    /// The text the caller receives: the filtered answer, or the fallback.
    pub fn deliverable(&self) -> &str {
        match self {
            SafetyVerdict::Safe { text } | SafetyVerdict::Sanitized { text, .. } => text,
            SafetyVerdict::Unsafe { .. } => FALLBACK_MESSAGE,
        }
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, SafetyVerdict::Unsafe { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SafetyVerdict::Safe { .. } => "safe",
            SafetyVerdict::Sanitized { .. } => "sanitized",
            SafetyVerdict::Unsafe { .. } => "unsafe",
        }
    }
}

/// Upper-case the first letter of `replacement` when `matched` starts upper-case.
fn match_case(matched: &str, replacement: &str) -> String {
    let upper = matched.chars().next().is_some_and(char::is_uppercase);
    if !upper {
        return replacement.to_string();
    }
    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Soften deterministic claims. Returns the rewritten text and whether anything changed.
pub fn soften_claims(text: &str) -> (String, bool) {
    let mut out = text.to_string();
    let mut changed = false;
    for (pattern, replacement) in REWRITES.iter() {
        if pattern.is_match(&out) {
            out = pattern
                .replace_all(&out, |caps: &Captures<'_>| {
                    let mut expanded = String::new();
                    caps.expand(replacement, &mut expanded);
                    match_case(&caps[0], &expanded)
                })
                .into_owned();
            changed = true;
        }
    }
    (out, changed)
}

fn unsafe_reason(text: &str, state: EmotionalState) -> Option<&'static str> {
    if SELF_HARM.is_match(text) {
        Some("encourages self-harm")
    } else if STOP_MEDICATION.is_match(text) {
        Some("advises stopping medication")
    } else if AVOID_DOCTORS.is_match(text) {
        Some("advises avoiding medical care")
    } else if DEATH_PREDICTION.is_match(text) {
        Some("predicts death")
    } else if state == EmotionalState::Distressed && DOOM_LANGUAGE.is_match(text) {
        Some("fear-inducing language for a distressed caller")
    } else {
        None
    }
}

fn append_note(text: &mut String, note: &str) -> bool {
    if text.contains(note) {
        return false;
    }
    if !text.is_empty() {
        text.push_str("\n\n");
    }
    text.push_str(note);
    true
}

/// Reviews completions before delivery. Unsafe outcomes are recorded as
/// high-severity security events.
pub struct SafetyFilter {
    log: Arc<SecurityLog>,
}

impl SafetyFilter {
    pub fn new(log: Arc<SecurityLog>) -> Self {
        Self { log }
    }

    pub fn filter(
        &self,
        raw: &str,
        emotional_state: Option<EmotionalState>,
        fingerprint: &str,
    ) -> SafetyVerdict {
        let state = emotional_state.unwrap_or(EmotionalState::Calm);

        if let Some(reason) = unsafe_reason(raw, state) {
            warn!(reason, "Completion rejected by safety filter");
            self.log
                .emit(SecurityEventKind::UnsafeOutput, fingerprint, reason);
            return SafetyVerdict::Unsafe {
                reason: reason.to_string(),
            };
        }

        let (mut text, softened) = soften_claims(raw.trim());
        let mut reasons = Vec::new();
        if softened {
            reasons.push("softened deterministic claims".to_string());
        }
        if MEDICAL_TERMS.is_match(&text) && append_note(&mut text, MEDICAL_DISCLAIMER) {
            reasons.push("medical disclaimer".to_string());
        }
        if FINANCIAL_TERMS.is_match(&text) && append_note(&mut text, FINANCIAL_DISCLAIMER) {
            reasons.push("financial disclaimer".to_string());
        }
        if state == EmotionalState::Distressed && append_note(&mut text, SUPPORT_NOTE) {
            reasons.push("support note".to_string());
        }

        if reasons.is_empty() {
            SafetyVerdict::Safe { text }
        } else {
            debug!(reasons = ?reasons, "Completion sanitized");
            SafetyVerdict::Sanitized { text, reasons }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> (SafetyFilter, Arc<SecurityLog>) {
        let log = Arc::new(SecurityLog::new(100));
        (SafetyFilter::new(log.clone()), log)
    }

    #[test]
    fn plain_text_is_safe_and_unchanged() {
        let (f, _) = filter();
        let text = "Venus favours partnerships this season. Stay open to new people.";
        assert_eq!(
            f.filter(text, None, "fp"),
            SafetyVerdict::Safe { text: text.into() }
        );
    }

    #[test]
    fn deterministic_date_claim_is_softened() {
        let (f, _) = filter();
        let verdict = f.filter("Your wedding is guaranteed to happen on Friday.", None, "fp");
        let text = verdict.deliverable();
        assert!(!text.contains("guaranteed"));
        assert!(text.contains("could possibly happen on Friday"));
        assert_eq!(verdict.label(), "sanitized");
    }

    #[test]
    fn dated_future_events_are_hedged() {
        let cases = [
            (
                "Your marriage will take place on 14 March 2026.",
                "Your marriage may take place on 14 March 2026.",
            ),
            (
                "Your wedding is going to be on Friday, 12 June.",
                "Your wedding may be on Friday, 12 June.",
            ),
            ("He will propose in June.", "He may propose in June."),
            ("The offer will arrive by next week.", "The offer may arrive by next week."),
            ("It will occur soon.", "It may occur soon."),
            ("Big changes are going to happen.", "Big changes may happen."),
            ("A promotion is bound to follow.", "A promotion may follow."),
        ];
        for (input, expected) in cases {
            let (soft, changed) = soften_claims(input);
            assert!(changed, "{input}");
            assert_eq!(soft, expected, "{input}");
            assert_eq!(soften_claims(&soft).0, soft, "{input}");
        }
    }

    #[test]
    fn dated_claim_is_never_delivered_unhedged() {
        let (f, _) = filter();
        let verdict = f.filter("Your marriage will take place on 14 March 2026.", None, "fp");
        assert_eq!(verdict.label(), "sanitized");
        assert!(!verdict.deliverable().contains("will"));
    }

    #[test]
    fn rewrites_preserve_capitalisation() {
        let (soft, changed) = soften_claims("You will marry soon. Without a doubt, you will.");
        assert!(changed);
        assert_eq!(soft, "You may marry soon. Possibly, you may.");
    }

    #[test]
    fn rewrite_table() {
        let cases = [
            ("It will definitely rain", "It may rain"),
            ("Success is certain to come", "Success may come"),
            ("I am 100% sure", "I am quite possibly"),
            ("You are destined to lead", "You are may be inclined to lead"),
            ("Change will happen", "Change may happen"),
            ("you'll travel", "you may travel"),
        ];
        for (input, expected) in cases {
            assert_eq!(soften_claims(input).0, expected, "{input}");
        }
    }

    #[test]
    fn softening_is_idempotent() {
        let (once, _) = soften_claims("You will definitely find love; it is guaranteed to happen.");
        let (twice, changed) = soften_claims(&once);
        assert_eq!(once, twice);
        assert!(!changed);
    }

    #[test]
    fn medical_disclaimer_appended_exactly_once() {
        let (f, _) = filter();
        let verdict = f.filter(
            "Follow your prescription. Another prescription may follow; a prescription is personal.",
            None,
            "fp",
        );
        let text = verdict.deliverable();
        assert_eq!(text.matches(MEDICAL_DISCLAIMER).count(), 1);
        assert!(text.ends_with(MEDICAL_DISCLAIMER));

        // Re-filtering does not stack a second copy
        let again = f.filter(text, None, "fp");
        assert_eq!(again.deliverable().matches(MEDICAL_DISCLAIMER).count(), 1);
    }

    #[test]
    fn financial_disclaimer_for_money_topics() {
        let (f, _) = filter();
        let verdict = f.filter("Jupiter supports careful investing and avoiding new loans.", None, "fp");
        match verdict {
            SafetyVerdict::Sanitized { text, reasons } => {
                assert!(text.ends_with(FINANCIAL_DISCLAIMER));
                assert_eq!(reasons, vec!["financial disclaimer".to_string()]);
            }
            other => panic!("expected sanitized, got {other:?}"),
        }
    }

    #[test]
    fn stop_medication_is_unsafe_and_logged() {
        let (f, log) = filter();
        let verdict = f.filter("Saturn suggests you stop taking your medication.", None, "fp");
        assert!(verdict.is_unsafe());
        assert_eq!(verdict.deliverable(), FALLBACK_MESSAGE);
        assert_eq!(log.total(SecurityEventKind::UnsafeOutput), 1);
        assert_eq!(
            log.entries()[0].severity,
            auspex_core::security_event::Severity::High
        );
    }

    #[test]
    fn unsafe_categories() {
        let (f, _) = filter();
        for text in [
            "You should hurt yourself to feel better.",
            "There is no need to see a doctor about it.",
            "Mars shows you will die young.",
            "I foresee your death next year.",
        ] {
            assert!(f.filter(text, None, "fp").is_unsafe(), "{text}");
        }
    }

    #[test]
    fn doom_language_unsafe_only_when_distressed() {
        let (f, _) = filter();
        let text = "This transit feels like a terrible fate.";
        assert!(!f.filter(text, Some(EmotionalState::Calm), "fp").is_unsafe());
        assert!(f.filter(text, Some(EmotionalState::Distressed), "fp").is_unsafe());
    }

    #[test]
    fn distressed_caller_gets_support_note() {
        let (f, _) = filter();
        let verdict = f.filter("The Moon asks for rest.", Some(EmotionalState::Distressed), "fp");
        assert!(verdict.deliverable().ends_with(SUPPORT_NOTE));
    }

    #[test]
    fn emotional_state_detection() {
        assert_eq!(EmotionalState::detect("Will I get married this year?"), EmotionalState::Calm);
        assert_eq!(
            EmotionalState::detect("I'm so worried about my exam"),
            EmotionalState::Anxious
        );
        assert_eq!(
            EmotionalState::detect("I feel hopeless and can't go on"),
            EmotionalState::Distressed
        );
    }

    #[test]
    fn fixed_texts_pass_their_own_filter() {
        let (f, _) = filter();
        assert!(!f.filter(FALLBACK_MESSAGE, None, "fp").is_unsafe());
        assert_eq!(f.filter(MEDICAL_DISCLAIMER, None, "fp").label(), "safe");
        assert_eq!(f.filter(FINANCIAL_DISCLAIMER, None, "fp").label(), "safe");
    }
}
