//! Fabula - Rust 互动小说生成器
//!
//! 入口：初始化日志、加载配置、创建模型客户端与故事引擎，然后运行逐行交互循环。
//! 用法：`fabula [config.toml]`；输入选项序号或文本推进故事，`/new <前提>` 开新故事，
//! `/character <描述>` 生成角色，`/quit` 退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use fabula::config::load_config;
use fabula::core::{ArtifactSource, StructuredOrchestrator};
use fabula::llm::create_client_from_config;
use fabula::memory::{ConversationStore, SessionPersistence, SummaryConfig, SummaryEngine};
use fabula::observability;
use fabula::story::{SceneTurn, StoryEngine};

fn print_scene(turn: &SceneTurn) {
    println!();
    println!("── Scene {} ──", turn.scene_number);
    println!("{}", turn.artifact.scene);
    for update in &turn.artifact.character_updates {
        println!("  * {}: {}", update.name, update.change);
    }
    if turn.source == ArtifactSource::Fallback {
        println!("  (the storyteller stumbled; this scene is improvised)");
    }
    if turn.artifact.is_ending {
        println!();
        println!("THE END. Type /new <premise> to start again or /quit to leave.");
        return;
    }
    for choice in &turn.artifact.choices {
        println!("  {}. {} [{}]", choice.id, choice.text, choice.difficulty);
    }
}

fn print_resumed(engine: &StoryEngine) {
    println!("Resumed story at scene {}.", engine.scene_number());
    if let Some(scene) = engine.last_scene() {
        println!("{}", scene.scene);
        for choice in &scene.choices {
            println!("  {}. {}", choice.id, choice.text);
        }
    }
    if engine.is_finished() {
        println!("THE END. Type /new <premise> to start again or /quit to leave.");
    }
}

fn save_snapshot(persistence: Option<&SessionPersistence>, engine: &StoryEngine) {
    if let Some(p) = persistence {
        if let Err(e) = p.save(&engine.store().snapshot()) {
            tracing::warn!("failed to save session: {:#}", e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    // 能力未配置（缺模型或凭据）是唯一致命错误
    let llm = create_client_from_config(&config.llm)
        .context("Chat completion is not configured (set FABULA__LLM__MODEL and OPENAI_API_KEY)")?;

    let summary = Arc::new(SummaryEngine::new(
        llm.clone(),
        SummaryConfig::from(&config.session),
    ));
    let store = ConversationStore::new(summary, config.session.max_history);
    let orchestrator = StructuredOrchestrator::from_config(llm.clone(), &config);
    let mut engine = StoryEngine::new(orchestrator, store, config.story.clone());

    let persistence = config.story.snapshot_path.as_ref().map(SessionPersistence::new);
    let restored = match persistence.as_ref() {
        Some(p) => p.load().context("Failed to load saved session")?,
        None => None,
    };
    let mut in_story = false;
    if let Some(snapshot) = restored {
        engine.store().restore_snapshot(snapshot);
        engine.resume();
        print_resumed(&engine);
        in_story = true;
    } else {
        println!("Describe the story you want to play (or /quit):");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" {
            break;
        }

        let result = if let Some(premise) = input.strip_prefix("/new") {
            let premise = premise.trim();
            if premise.is_empty() {
                println!("Usage: /new <premise>");
                continue;
            }
            engine.begin(premise).await
        } else if let Some(hint) = input.strip_prefix("/character") {
            match engine.generate_character(hint).await {
                Ok(c) => {
                    println!("{} ({}) - {}", c.name, c.role, c.description);
                    if !c.traits.is_empty() {
                        println!("  traits: {}", c.traits.join(", "));
                    }
                    continue;
                }
                Err(e) => Err(e),
            }
        } else if !in_story || engine.is_finished() {
            engine.begin(input).await
        } else {
            engine.advance(input).await
        };

        match result {
            Ok(turn) => {
                in_story = true;
                print_scene(&turn);
                save_snapshot(persistence.as_ref(), &engine);
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("turn failed: {}", e);
                println!("Something went wrong, try again.");
            }
            Err(e) => return Err(e).context("Story generation failed"),
        }
    }

    // 等待进行中的后台摘要，再保存一次以带上最新摘要
    engine.store().wait_idle().await;
    save_snapshot(persistence.as_ref(), &engine);
    let (prompt, completion, total) = llm.token_usage();
    tracing::info!(
        "session finished: {} prompt + {} completion = {} tokens",
        prompt,
        completion,
        total
    );
    Ok(())
}
