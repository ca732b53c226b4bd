//! Prompt assembly
//!
//! Renders the fixed instruction template. The prompt ends with an open
//! answer tag; requests pass [`ANSWER_CLOSE_TAG`] as the stop sequence so
//! the model stops exactly where that tag would close.

use chrono::NaiveDate;

/// Query that asks the model to keep going from the prior answer
pub const CONTINUE_QUERY: &str = "Continue";

/// Opening answer tag the prompt ends with
pub const ANSWER_OPEN_TAG: &str = "<answer>";

/// Closing answer tag, doubling as the upstream stop sequence
pub const ANSWER_CLOSE_TAG: &str = "</answer>";

/// Characters of prior answer kept as history
pub const PRIOR_ANSWER_WINDOW: usize = 4000;

/// Share of the token budget expressed as a word budget
const WORD_BUDGET_RATIO: f64 = 0.2;

const NONE_MARKER: &str = "None.";

const DENSITY_RULE: &str =
    "DENSITY 4/5: Expert-briefing level. No filler, no transitions. Every sentence = new information.";
const CITATION_RULE: &str = "CITATIONS: Cite [n] only for specific facts from sources. Max 3 total. Sentence-end only. Never cite common knowledge.";
const CONFIDENCE_RULE: &str =
    "NO HEDGE: State answers confidently. Note uncertainty only if critical.";
const HISTORY_RULE: &str = "HISTORY: Refer to prior exchange for context. Do not repeat.";

const CONTINUE_TASK: &str =
    "CONTINUE: Pick up exactly where previous answer stopped. No repetition. Seamless flow.";
const FOLLOW_UP_TASK: &str =
    "FOLLOW-UP: Address the new question using prior context. Prioritize the new query.";
const ANSWER_TASK: &str =
    "ANSWER FIRST: Lead with the direct answer. No preamble, no context-setting.";

const GROUNDED_RULE: &str =
    "GROUNDING: Trust sources for current events. Use knowledge for fundamentals.";
const UNGROUNDED_RULE: &str = "GROUNDING: No sources available. Use knowledge and note 'based on general knowledge'.";

/// Everything a prompt is rendered from
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub query: &'a str,
    /// Language tag; `all`, `auto` or empty means no language directive
    pub language: &'a str,
    pub grounding: &'a str,
    pub prior_answer: &'a str,
    pub today: NaiveDate,
}

/// Which directive leads the instruction block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Continue,
    FollowUp,
    Answer,
}

impl Task {
    pub fn select(query: &str, prior_answer: &str) -> Self {
        if query == CONTINUE_QUERY {
            Task::Continue
        } else if !prior_answer.is_empty() {
            Task::FollowUp
        } else {
            Task::Answer
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            Task::Continue => CONTINUE_TASK,
            Task::FollowUp => FOLLOW_UP_TASK,
            Task::Answer => ANSWER_TASK,
        }
    }
}

/// Renders prompts for a fixed output-token budget
#[derive(Debug, Clone, Copy)]
pub struct PromptAssembler {
    max_output_tokens: u32,
}

impl PromptAssembler {
    pub fn new(max_output_tokens: u32) -> Self {
        PromptAssembler { max_output_tokens }
    }

    /// Target answer length in words
    pub fn word_budget(&self) -> u32 {
        (self.max_output_tokens as f64 * WORD_BUDGET_RATIO) as u32
    }

    /// Render the full prompt text
    pub fn render(&self, input: &PromptInput<'_>) -> String {
        let prior_answer = truncate_tail(input.prior_answer, PRIOR_ANSWER_WINDOW);

        let language = match input.language.trim() {
            "" | "all" | "auto" => String::new(),
            lang => format!(" Respond in {}.", lang),
        };
        let system = format!(
            "You are a search synthesis engine. Direct, grounded, citation-accurate. Today is {}.{}",
            input.today.format("%Y-%m-%d"),
            language
        );

        let brevity = format!(
            "BREVITY: {} words max. Complete, not verbose.",
            self.word_budget()
        );
        let mut rules: Vec<&str> = vec![
            Task::select(input.query, prior_answer).directive(),
            DENSITY_RULE,
            brevity.as_str(),
            CITATION_RULE,
            CONFIDENCE_RULE,
            if input.grounding.is_empty() {
                UNGROUNDED_RULE
            } else {
                GROUNDED_RULE
            },
        ];
        if !prior_answer.is_empty() {
            rules.push(HISTORY_RULE);
        }

        let instructions = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| format!("{}. {}", i + 1, rule))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "<system>{system}</system>\n\n\
             <sources>\n{sources}\n</sources>\n\n\
             <history>\n{history}\n</history>\n\n\
             <query>{query}</query>\n\n\
             <instructions>\n{instructions}\n</instructions>\n\n\
             {open}",
            sources = or_none(input.grounding),
            history = or_none(prior_answer),
            query = input.query,
            open = ANSWER_OPEN_TAG,
        )
    }
}

fn or_none(text: &str) -> &str {
    if text.is_empty() {
        NONE_MARKER
    } else {
        text
    }
}

/// Keep the last `max_chars` characters of `text`
pub fn truncate_tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
