//! Tiered context-compaction engine. Five escalating levels, each operating
//! on whole **turns** (a user message plus everything up to the next user
//! message) rather than on individual messages, so a turn's tool calls and
//! their results are always compacted together.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::message::{Message, Thread, ToolMessage};
use crate::model_spec;

/// Defaults to a 128k context window with 4k reserved for the next response,
/// plus the turn-count thresholds each level keeps verbatim as configurable
/// knobs rather than magic numbers.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    pub max_context_tokens: usize,
    pub reserve_tokens: usize,
    /// Turns younger than this survive Light and Medium compaction untouched.
    pub light_keep_turns: usize,
    /// Turns younger than this survive even Heavy compaction untouched.
    pub heavy_keep_turns: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            reserve_tokens: 4_096,
            light_keep_turns: 3,
            heavy_keep_turns: 1,
        }
    }
}

/// The five compaction levels, ordered least to most aggressive.
/// Declaration order is significant: `derive(PartialOrd, Ord)` makes `None <
/// Light < Medium < Heavy < Emergency`, used by [`CompactionEngine::compact`]
/// to pick "the smallest level that brings the estimated token count under
/// budget".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionLevel {
    None,
    Light,
    Medium,
    Heavy,
    Emergency,
}

impl CompactionLevel {
    pub fn all() -> [CompactionLevel; 5] {
        [
            CompactionLevel::None,
            CompactionLevel::Light,
            CompactionLevel::Medium,
            CompactionLevel::Heavy,
            CompactionLevel::Emergency,
        ]
    }

    /// Numeric level, 0 through 4.
    pub fn as_u8(self) -> u8 {
        match self {
            CompactionLevel::None => 0,
            CompactionLevel::Light => 1,
            CompactionLevel::Medium => 2,
            CompactionLevel::Heavy => 3,
            CompactionLevel::Emergency => 4,
        }
    }
}

/// The structured fields an LLM-backed summarizer is asked to produce:
/// objective, completed steps, open questions, decisions made, key files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryDraft {
    pub objective: String,
    pub completed_steps: Vec<String>,
    pub open_questions: Vec<String>,
    pub decisions_made: Vec<String>,
    pub key_files: Vec<String>,
}

/// Persisted on a [`Thread`] once compaction has run at level Medium or
/// above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactedSummary {
    pub level: CompactionLevel,
    pub objective: String,
    pub completed_steps: Vec<String>,
    pub open_questions: Vec<String>,
    pub decisions_made: Vec<String>,
    pub key_files: Vec<String>,
    pub original_token_count: usize,
    pub final_token_count: usize,
    pub kept_turn_count: usize,
    pub compacted_turn_count: usize,
    pub created_at: SystemTime,
}

/// Emitted statistics for one compaction run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionStats {
    pub original_tokens: usize,
    pub final_tokens: usize,
    pub saved_percent: f32,
    pub kept_turns: usize,
    pub compacted_turns: usize,
    pub level_used: Option<CompactionLevel>,
}

/// Anything capable of turning turn text into a [`SummaryDraft`], backed by
/// an LLM call in production and a mechanical truncator in tests or as a
/// fallback when summary generation fails.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns_text: &[String]) -> Result<SummaryDraft, AgentError>;
}

/// Mechanical fallback: the first 200 chars of each turn, joined into the
/// objective field; the other structured fields are left empty since there
/// is no LLM to extract them.
pub struct MechanicalSummarizer;

#[async_trait::async_trait]
impl Summarizer for MechanicalSummarizer {
    async fn summarize(&self, turns_text: &[String]) -> Result<SummaryDraft, AgentError> {
        let objective = turns_text
            .iter()
            .map(|t| t.chars().take(200).collect::<String>())
            .collect::<Vec<_>>()
            .join(" … ");
        Ok(SummaryDraft { objective, ..Default::default() })
    }
}

/// Very rough chars/4 estimator, avoiding a real tokenizer dependency for
/// budget checks: a heuristic of 4 chars ≈ 1 token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

fn message_text(msg: &Message) -> String {
    match msg {
        Message::User(m) => m.text.clone(),
        Message::Assistant(m) => {
            let mut s = m.text.clone();
            for tc in &m.tool_calls {
                s.push_str(&format!("\n[tool:{} -> {:?}]", tc.name, tc.status));
            }
            s
        }
        Message::Tool(m) => m.text.clone(),
        Message::System(m) => m.text.clone(),
    }
}

fn messages_token_estimate(messages: &[Message]) -> usize {
    messages.iter().map(|m| estimate_tokens(&message_text(m))).sum()
}

/// Splits a message list into turns: a turn starts at a `User` message and
/// runs up to (exclusive of) the next one. Any messages preceding the first
/// `User` message (e.g. a leading `System` prompt) form turn 0 on their own.
fn turn_boundaries(messages: &[Message]) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut start = 0;
    for (i, m) in messages.iter().enumerate() {
        if i > 0 && matches!(m, Message::User(_)) {
            bounds.push((start, i));
            start = i;
        }
    }
    bounds.push((start, messages.len()));
    bounds
}

fn placeholder_tool_text(original: &str) -> String {
    format!("… [tool result omitted during compaction, {} chars] …", original.chars().count())
}

/// Applies Light-level dropping in place: blanks tool-result text for every
/// message in `range`, keeping the owning ToolCall's name/arguments intact
/// (those live on the Assistant message, untouched here).
fn drop_tool_results(messages: &mut [Message], range: (usize, usize)) {
    for m in &mut messages[range.0..range.1] {
        if let Message::Tool(ToolMessage { text, .. }) = m {
            if !text.starts_with("… [tool result omitted") {
                *text = placeholder_tool_text(text);
            }
        }
    }
}

fn turn_text(messages: &[Message], range: (usize, usize)) -> String {
    messages[range.0..range.1].iter().map(message_text).collect::<Vec<_>>().join("\n")
}

pub struct CompactionEngine<'a> {
    pub config: CompactionConfig,
    pub summarizer: &'a dyn Summarizer,
}

impl<'a> CompactionEngine<'a> {
    pub fn new(config: CompactionConfig, summarizer: &'a dyn Summarizer) -> Self {
        Self { config, summarizer }
    }

    /// Total estimated tokens a thread currently occupies, used by the turn
    /// loop to decide whether to compact before assembling the next request.
    pub fn thread_token_estimate(&self, thread: &Thread) -> usize {
        messages_token_estimate(&thread.messages)
    }

    fn budget_for(&self, model_id: &str) -> usize {
        let window = model_spec::lookup(model_id).context_window as usize;
        window.min(self.config.max_context_tokens).saturating_sub(self.config.reserve_tokens)
    }

    /// Whether the thread's current token estimate exceeds the model's
    /// budget net of the reserved response headroom.
    pub fn needs_compaction(&self, thread: &Thread, model_id: &str) -> bool {
        self.thread_token_estimate(thread) > self.budget_for(model_id)
    }

    /// Materializes the message list for one compaction level without
    /// mutating the thread — this produces a new message list for the
    /// request only.
    async fn apply_level(
        &self,
        thread: &Thread,
        level: CompactionLevel,
        system_prompt: Option<&str>,
    ) -> Result<(Vec<Message>, SummaryDraft, usize, usize), AgentError> {
        let bounds = turn_boundaries(&thread.messages);
        let total_turns = bounds.len();

        if level == CompactionLevel::None {
            return Ok((thread.messages.clone(), SummaryDraft::default(), 0, total_turns));
        }

        if level == CompactionLevel::Emergency {
            // Only the system prompt + CompactedSummary + last user turn + last assistant turn.
            let mut out = Vec::new();
            if let Some(p) = system_prompt {
                out.push(Message::system(p.to_string()));
            }
            if let Some(summary) = &thread.summary {
                out.push(Message::system(format!("[prior context summary] {}", summary.objective)));
            }
            let last_turn = bounds.last().copied().unwrap_or((0, thread.messages.len()));
            let mut tail: Vec<Message> = thread.messages[last_turn.0..last_turn.1].to_vec();
            out.append(&mut tail);
            let draft = self.summarizer.summarize(&[turn_text(&thread.messages, (0, last_turn.0))]).await?;
            return Ok((out, draft, total_turns.saturating_sub(1), 1));
        }

        let keep_from_turn = total_turns.saturating_sub(match level {
            CompactionLevel::Light | CompactionLevel::Medium => self.config.light_keep_turns,
            CompactionLevel::Heavy => self.config.heavy_keep_turns,
            _ => unreachable!(),
        });

        let mut messages = thread.messages.clone();
        let old_ranges: Vec<(usize, usize)> = bounds[..keep_from_turn].to_vec();

        for &range in &old_ranges {
            drop_tool_results(&mut messages, range);
        }

        if level == CompactionLevel::Light {
            let draft = SummaryDraft::default();
            return Ok((messages, draft, keep_from_turn, total_turns - keep_from_turn));
        }

        // Medium and Heavy: summarize every old turn into one bullet-list message.
        let old_texts: Vec<String> =
            old_ranges.iter().map(|&r| turn_text(&thread.messages, r)).collect();
        let draft = self.summarizer.summarize(&old_texts).await.unwrap_or_else(|_| SummaryDraft {
            objective: old_texts.iter().map(|t| t.chars().take(200).collect::<String>()).collect::<Vec<_>>().join(" … "),
            ..Default::default()
        });

        let mut bullets = format!("[compacted summary] objective: {}", draft.objective);
        if !draft.decisions_made.is_empty() {
            bullets.push_str(&format!("\ndecisions: {}", draft.decisions_made.join("; ")));
        }
        if !draft.completed_steps.is_empty() {
            bullets.push_str(&format!("\ncompleted: {}", draft.completed_steps.join("; ")));
        }
        let summary_message = Message::system(bullets);

        let keep_from_index = old_ranges.last().map(|r| r.1).unwrap_or(0);
        let mut kept_tail = messages[keep_from_index..].to_vec();

        if level == CompactionLevel::Heavy {
            // Drop all tool-results before the last 1 turn; keep only summaries.
            let heavy_keep_from_turn = total_turns.saturating_sub(self.config.heavy_keep_turns);
            let heavy_start = bounds
                .get(heavy_keep_from_turn)
                .map(|r| r.0)
                .unwrap_or(keep_from_index)
                .saturating_sub(keep_from_index);
            drop_tool_results(&mut kept_tail, (0, heavy_start.min(kept_tail.len())));
        }

        let mut out = vec![summary_message];
        out.extend(kept_tail);
        Ok((out, draft, keep_from_turn, total_turns - keep_from_turn))
    }

    /// Picks the smallest (least aggressive) level whose resulting message
    /// list fits the budget, and produces it. Falls back to Emergency if
    /// nothing else fits.
    pub async fn compact(
        &self,
        thread: &Thread,
        model_id: &str,
        system_prompt: Option<&str>,
    ) -> Result<(Vec<Message>, CompactedSummary, CompactionStats), AgentError> {
        let budget = self.budget_for(model_id);
        let original_tokens = self.thread_token_estimate(thread);

        let mut chosen = None;
        for level in CompactionLevel::all() {
            let (messages, draft, compacted_turns, kept_turns) =
                self.apply_level(thread, level, system_prompt).await?;
            let tokens = messages_token_estimate(&messages);
            if tokens <= budget || level == CompactionLevel::Emergency {
                chosen = Some((level, messages, draft, compacted_turns, kept_turns, tokens));
                break;
            }
        }
        let (level, messages, draft, compacted_turns, kept_turns, final_tokens) =
            chosen.expect("Emergency level always satisfies the loop's break condition");

        let saved_percent = if original_tokens == 0 {
            0.0
        } else {
            100.0 * (1.0 - final_tokens as f32 / original_tokens as f32)
        };

        let summary = CompactedSummary {
            level,
            objective: draft.objective,
            completed_steps: draft.completed_steps,
            open_questions: draft.open_questions,
            decisions_made: draft.decisions_made,
            key_files: draft.key_files,
            original_token_count: original_tokens,
            final_token_count: final_tokens,
            kept_turn_count: kept_turns,
            compacted_turn_count: compacted_turns,
            created_at: SystemTime::now(),
        };
        let stats = CompactionStats {
            original_tokens,
            final_tokens,
            saved_percent,
            kept_turns,
            compacted_turns,
            level_used: Some(level),
        };
        Ok((messages, summary, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn thread_with_turns(n: usize) -> Thread {
        let mut thread = Thread::new();
        for i in 0..n {
            thread.messages.push(Message::user(format!("request {i} please do the thing with file_{i}.rs")));
            let mut am = crate::message::AssistantMessage::new_streaming();
            am.text = format!("working on request {i}, decided to use approach {i}");
            am.state = crate::message::AssistantState::Complete;
            thread.messages.push(Message::Assistant(am));
            thread.messages.push(Message::Tool(crate::message::ToolMessage {
                id: uuid::Uuid::new_v4(),
                created_at: SystemTime::now(),
                tool_call_id: format!("t{i}"),
                text: "x".repeat(400),
                content: vec![],
                status: crate::message::ToolMessageStatus::Success,
            }));
        }
        thread
    }

    #[tokio::test]
    async fn needs_compaction_false_for_short_thread() {
        let mut thread = Thread::new();
        thread.messages.push(Message::user("hello"));
        let summarizer = MechanicalSummarizer;
        let engine = CompactionEngine::new(CompactionConfig::default(), &summarizer);
        assert!(!engine.needs_compaction(&thread, "gpt-4o"));
    }

    #[tokio::test]
    async fn needs_compaction_true_when_over_budget() {
        let thread = thread_with_turns(200);
        let summarizer = MechanicalSummarizer;
        let mut cfg = CompactionConfig::default();
        cfg.max_context_tokens = 4_000;
        let engine = CompactionEngine::new(cfg, &summarizer);
        assert!(engine.needs_compaction(&thread, "gpt-4o"));
    }

    /// 200 turns, 4k budget → level >= Medium, original > final tokens, last
    /// user turn kept verbatim, non-empty objective.
    #[tokio::test]
    async fn compaction_escalates_and_preserves_last_turn() {
        let thread = thread_with_turns(200);
        let summarizer = MechanicalSummarizer;
        let mut cfg = CompactionConfig::default();
        cfg.max_context_tokens = 4_000;
        let engine = CompactionEngine::new(cfg, &summarizer);
        let (messages, summary, stats) = engine.compact(&thread, "gpt-4o", Some("system")).await.unwrap();

        assert!(summary.level >= CompactionLevel::Medium);
        assert!(stats.original_tokens > stats.final_tokens);
        assert!(!summary.objective.is_empty());

        let last_user_text = match thread.messages.iter().rev().find(|m| matches!(m, Message::User(_))).unwrap() {
            Message::User(u) => u.text.clone(),
            _ => unreachable!(),
        };
        assert!(messages.iter().any(|m| matches!(m, Message::User(u) if u.text == last_user_text)));
    }

    #[tokio::test]
    async fn none_level_returns_thread_verbatim() {
        let thread = thread_with_turns(2);
        let summarizer = MechanicalSummarizer;
        let engine = CompactionEngine::new(CompactionConfig::default(), &summarizer);
        let (messages, _, _, _) = engine.apply_level(&thread, CompactionLevel::None, None).await.unwrap();
        assert_eq!(messages.len(), thread.messages.len());
    }

    #[tokio::test]
    async fn light_level_blanks_old_tool_results_but_keeps_tool_call_names() {
        let thread = thread_with_turns(10);
        let summarizer = MechanicalSummarizer;
        let mut cfg = CompactionConfig::default();
        cfg.light_keep_turns = 3;
        let engine = CompactionEngine::new(cfg, &summarizer);
        let (messages, _, _, _) = engine.apply_level(&thread, CompactionLevel::Light, None).await.unwrap();
        let blanked = messages.iter().filter(|m| {
            matches!(m, Message::Tool(t) if t.text.starts_with("… [tool result omitted"))
        }).count();
        assert!(blanked > 0);
    }

    #[tokio::test]
    async fn mechanical_summarizer_truncates_each_turn_to_200_chars() {
        let long = "x".repeat(500);
        let draft = MechanicalSummarizer.summarize(&[long.clone(), long]).await.unwrap();
        assert!(draft.objective.len() < 500 * 2);
    }

    #[tokio::test]
    async fn light_level_reports_compacted_and_kept_turn_counts_unswapped() {
        let thread = thread_with_turns(10);
        let summarizer = MechanicalSummarizer;
        let mut cfg = CompactionConfig::default();
        cfg.light_keep_turns = 3;
        let engine = CompactionEngine::new(cfg, &summarizer);
        let (_, _, compacted_turns, kept_turns) =
            engine.apply_level(&thread, CompactionLevel::Light, None).await.unwrap();
        assert_eq!(kept_turns, 3);
        assert_eq!(compacted_turns, 10 - 3);
    }

    #[tokio::test]
    async fn none_level_reports_zero_compacted_and_all_turns_kept() {
        let thread = thread_with_turns(5);
        let summarizer = MechanicalSummarizer;
        let engine = CompactionEngine::new(CompactionConfig::default(), &summarizer);
        let (_, _, compacted_turns, kept_turns) =
            engine.apply_level(&thread, CompactionLevel::None, None).await.unwrap();
        assert_eq!(compacted_turns, 0);
        assert_eq!(kept_turns, 5);
    }

    #[tokio::test]
    async fn emergency_level_reports_one_kept_turn_and_the_rest_compacted() {
        let thread = thread_with_turns(8);
        let summarizer = MechanicalSummarizer;
        let engine = CompactionEngine::new(CompactionConfig::default(), &summarizer);
        let (_, _, compacted_turns, kept_turns) =
            engine.apply_level(&thread, CompactionLevel::Emergency, None).await.unwrap();
        assert_eq!(kept_turns, 1);
        assert_eq!(compacted_turns, 7);
    }
}
