//! 故事引擎：开场、推进、角色生成与节奏控制
//!
//! 每一幕：玩家选择写入对话 → 组装有界上下文 → 编排器产出场景（或回退模板）→
//! 规范化后的场景 JSON 作为 assistant 回复写回对话（可能触发后台摘要）。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::StorySection;
use crate::core::{
    strengthen_system_prompt, ArtifactSource, FallbackContext, StoryError, StructuredOrchestrator,
};
use crate::memory::{ConversationStore, Message, Role};
use crate::story::{Character, SceneArtifact};
use crate::structured::ArtifactKind;

const HIGH_TENSION: u8 = 8;

fn narrator_prompt() -> String {
    format!(
        "You are the narrator of an interactive story. Write vivid second-person prose and keep \
         continuity with everything that happened before.\n\
         Every reply is ONE JSON object matching this schema:\n{}\n\
         Reply with JSON only.",
        SceneArtifact::schema_json()
    )
}

/// 一幕的生成结果
#[derive(Debug, Clone)]
pub struct SceneTurn {
    pub scene_number: usize,
    pub artifact: SceneArtifact,
    pub source: ArtifactSource,
    /// 本幕消耗的模型往返次数
    pub attempts: usize,
}

pub struct StoryEngine {
    orchestrator: StructuredOrchestrator,
    store: ConversationStore,
    pacing: StorySection,
    rng: StdRng,
    scene_number: usize,
    finished: bool,
}

impl StoryEngine {
    pub fn new(
        orchestrator: StructuredOrchestrator,
        store: ConversationStore,
        pacing: StorySection,
    ) -> Self {
        Self::with_rng(orchestrator, store, pacing, StdRng::from_entropy())
    }

    /// 注入随机源（测试用固定种子）
    pub fn with_rng(
        orchestrator: StructuredOrchestrator,
        store: ConversationStore,
        pacing: StorySection,
        rng: StdRng,
    ) -> Self {
        Self {
            orchestrator,
            store,
            pacing,
            rng,
            scene_number: 0,
            finished: false,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn scene_number(&self) -> usize {
        self.scene_number
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 从恢复的会话继续：已生成的幕数即累计的 assistant 回复数，
    /// 是否已结局取最后一幕的 isEnding
    pub fn resume(&mut self) {
        self.scene_number = self.store.summary_state().trigger_count;
        self.finished = self
            .last_scene()
            .map(|scene| scene.is_ending)
            .unwrap_or(false);
    }

    /// 历史中最近一幕（assistant 回复里的场景 JSON）
    pub fn last_scene(&self) -> Option<SceneArtifact> {
        self.store
            .messages()
            .into_iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| serde_json::from_str(&m.content).ok())
            .and_then(|v| SceneArtifact::from_value(&v))
    }

    /// 开始新故事：清空会话，写入叙述者指令与前提，生成第一幕
    pub async fn begin(&mut self, premise: &str) -> Result<SceneTurn, StoryError> {
        self.store.reset();
        self.scene_number = 0;
        self.finished = false;
        self.store.append(Role::System, narrator_prompt());
        self.store
            .append(Role::User, format!("Start a new story. Premise: {}", premise.trim()));
        tracing::info!("starting new story");
        self.next_scene(None).await
    }

    /// 玩家做出选择，生成下一幕
    pub async fn advance(&mut self, choice: &str) -> Result<SceneTurn, StoryError> {
        let choice = choice.trim().to_string();
        self.store.append(Role::User, format!("I choose: {}", choice));
        self.next_scene(Some(choice)).await
    }

    async fn next_scene(&mut self, last_choice: Option<String>) -> Result<SceneTurn, StoryError> {
        let scene_number = self.scene_number + 1;
        let choice_count = self.choice_count();
        let ending = self.should_end(scene_number);

        let instruction = if ending {
            format!(
                "Write scene {} as the FINAL scene: resolve the story, set isEnding to true and \
                 leave choices empty.",
                scene_number
            )
        } else {
            format!(
                "Write scene {}. Offer exactly {} choices and set isEnding to false.",
                scene_number, choice_count
            )
        };
        let mut context = self.store.context_messages();
        context.push(Message::system(instruction));

        let fallback_ctx = FallbackContext {
            last_choice,
            scene_number,
            choice_count,
        };
        let outcome = self
            .orchestrator
            .produce_structured(
                ArtifactKind::Scene,
                |variant| strengthen_system_prompt(context.clone(), variant),
                &fallback_ctx,
            )
            .await?;

        let (mut artifact, source) = match SceneArtifact::from_value(&outcome.value) {
            Some(artifact) => (artifact, outcome.source),
            None => (SceneArtifact::fallback(&fallback_ctx), ArtifactSource::Fallback),
        };
        if ending {
            artifact.is_ending = true;
            artifact.choices.clear();
        }

        self.store.append(Role::Assistant, artifact.to_json());
        self.scene_number = scene_number;
        self.finished = artifact.is_ending;
        if source == ArtifactSource::Fallback {
            tracing::warn!("scene {} served from fallback template", scene_number);
        }

        Ok(SceneTurn {
            scene_number,
            artifact,
            source,
            attempts: outcome.attempts.len(),
        })
    }

    /// 生成一个新角色；不写入对话历史
    pub async fn generate_character(&mut self, hint: &str) -> Result<Character, StoryError> {
        let mut context = self.store.context_messages();
        context.retain(|m| m.role == Role::System);
        context.push(Message::system(format!(
            "Create a character for this story as ONE JSON object matching this schema:\n{}\n\
             Reply with JSON only.",
            Character::schema_json()
        )));
        context.push(Message::user(format!("Character idea: {}", hint.trim())));

        let outcome = self
            .orchestrator
            .produce_structured(
                ArtifactKind::Character,
                |variant| strengthen_system_prompt(context.clone(), variant),
                &FallbackContext::default(),
            )
            .await?;
        Ok(Character::from_value(&outcome.value).unwrap_or_else(|| {
            tracing::warn!("character output unusable, using fallback template");
            Character::fallback()
        }))
    }

    /// 本幕选项数：在 [min_choices, max_choices] 中均匀抽取，按 jitter 概率再 ±1
    pub fn choice_count(&mut self) -> usize {
        let min = self.pacing.min_choices.max(1);
        let max = self.pacing.max_choices.max(min);
        let mut count = self.rng.gen_range(min..=max);
        if self.rng.gen_bool(self.pacing.choice_count_jitter.clamp(0.0, 1.0)) {
            if self.rng.gen_bool(0.5) {
                count += 1;
            } else {
                count = count.saturating_sub(1).max(1);
            }
        }
        count
    }

    /// 第 scene_number 幕是否应为结局
    pub fn should_end(&mut self, scene_number: usize) -> bool {
        let target = self.pacing.target_scenes.max(1);
        if scene_number >= target {
            return self
                .rng
                .gen_bool(self.pacing.ending_chance_at_target.clamp(0.0, 1.0));
        }
        let tension = self
            .store
            .digest()
            .map(|d| d.tension_level())
            .unwrap_or(0);
        if scene_number * 2 >= target && tension >= HIGH_TENSION {
            return self
                .rng
                .gen_bool(self.pacing.ending_chance_high_tension.clamp(0.0, 1.0));
        }
        false
    }
}
