//! Engine scenarios on in-memory services with paused time.

mod common;

use std::path::{Path, PathBuf};

use common::{doc, sleep_ms, Harness, A, B};
use docsync_core::{
    CloseDecision, CloseOutcome, DraftStore, EngineError, PromptResolution, Reconciliation,
    SaveOutcome, SyncEvent, SyncSettings, TabMode, TabStatus, WatchCall,
};

// ---- Autosave ----

#[tokio::test(start_paused = true)]
async fn test_draft_holds_last_edit_after_burst() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "disk");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    for text in ["d", "di", "dif", "diff"] {
        h.engine.content_changed(tab, text.into()).unwrap();
        sleep_ms(100).await;
    }
    assert_eq!(h.draft(A).await, None);

    sleep_ms(500).await;
    assert_eq!(h.draft(A).await.as_deref(), Some("diff"));
    assert!(h.is_dirty(tab));
    assert_eq!(h.fs.write_count(A), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_write_disk_once() {
    let h = Harness::new();
    h.fs.set_external(A, "disk");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    for i in 0..10 {
        h.engine.content_changed(tab, format!("edit {i}")).unwrap();
        sleep_ms(50).await;
    }
    sleep_ms(1500).await;

    assert_eq!(h.fs.write_count(A), 1);
    assert_eq!(h.fs.contents(A).as_deref(), Some("edit 9"));
    assert_eq!(h.draft(A).await, None);
    assert_eq!(h.engine.tab(tab).unwrap().status, TabStatus::Clean);
}

#[tokio::test(start_paused = true)]
async fn test_undo_to_disk_content_removes_draft() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "disk");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    h.engine.content_changed(tab, "changed".into()).unwrap();
    sleep_ms(600).await;
    assert!(h.is_dirty(tab));

    h.engine.content_changed(tab, "disk".into()).unwrap();
    sleep_ms(600).await;

    assert_eq!(h.draft(A).await, None);
    assert!(!h.is_dirty(tab));
}

#[tokio::test(start_paused = true)]
async fn test_failed_autosave_keeps_draft() {
    let h = Harness::new();
    h.fs.set_external(A, "disk");
    h.fs.fail_writes(A, true);
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    h.engine.content_changed(tab, "unsaved".into()).unwrap();
    sleep_ms(1500).await;

    assert_eq!(h.fs.contents(A).as_deref(), Some("disk"));
    assert_eq!(h.draft(A).await.as_deref(), Some("unsaved"));
    assert!(h.is_dirty(tab));
    assert!(
        h.events()
            .iter()
            .any(|e| matches!(e, SyncEvent::WriteFailed { path, .. } if *path == doc(A)))
    );

    // No retry.
    sleep_ms(5000).await;
    assert_eq!(h.fs.write_count(A), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_draft_write_still_marks_dirty() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "disk");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.drafts.set_failing(true);

    h.engine.content_changed(tab, "edit".into()).unwrap();
    sleep_ms(600).await;

    assert!(h.is_dirty(tab));

    // Manual save falls back to the buffer.
    h.drafts.set_failing(false);
    assert_eq!(h.engine.save(tab).await.unwrap(), SaveOutcome::Saved);
    assert_eq!(h.fs.contents(A).as_deref(), Some("edit"));
}

#[tokio::test(start_paused = true)]
async fn test_disabling_auto_save_stops_disk_writes() {
    let h = Harness::new();
    h.fs.set_external(A, "disk");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    h.engine.update_settings(SyncSettings {
        auto_save: false,
        ..SyncSettings::default()
    });
    h.engine.content_changed(tab, "edit".into()).unwrap();
    sleep_ms(3000).await;

    assert_eq!(h.fs.write_count(A), 0);
    assert_eq!(h.draft(A).await.as_deref(), Some("edit"));
}

// ---- Manual save ----

#[tokio::test(start_paused = true)]
async fn test_manual_save_flushes_latest_buffer() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "disk");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    h.engine.content_changed(tab, "typed".into()).unwrap();
    assert_eq!(h.engine.save(tab).await.unwrap(), SaveOutcome::Saved);

    assert_eq!(h.fs.contents(A).as_deref(), Some("typed"));
    assert_eq!(h.draft(A).await, None);
    assert!(!h.is_dirty(tab));

    // The cancelled draft timer must not resurrect a draft.
    sleep_ms(1000).await;
    assert_eq!(h.draft(A).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_save_without_changes_is_noop() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "disk");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    assert_eq!(h.engine.save(tab).await.unwrap(), SaveOutcome::NothingToSave);
    assert_eq!(h.fs.write_count(A), 0);
}

#[tokio::test(start_paused = true)]
async fn test_commit_draft_without_open_tab() {
    let h = Harness::manual_save();
    h.drafts.save_draft(&doc(A), "from draft").await.unwrap();

    let outcome = h.engine.commit_draft_to_disk(&doc(A)).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Saved);
    assert_eq!(h.fs.contents(A).as_deref(), Some("from draft"));
    assert!(!h.engine.has_draft(&doc(A)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_manual_save_failure_reports_and_keeps_draft() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "disk");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "edit".into()).unwrap();
    sleep_ms(600).await;

    h.fs.fail_writes(A, true);
    let result = h.engine.save(tab).await;

    assert!(matches!(result, Err(EngineError::Fs(_))));
    assert_eq!(h.draft(A).await.as_deref(), Some("edit"));
    assert!(h.is_dirty(tab));
}

// ---- Reconciliation ----

#[tokio::test(start_paused = true)]
async fn test_clean_tab_reloads_silently() {
    let h = Harness::new();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    h.fs.set_external(A, "v2");
    let result = h.engine.handle_file_changed(Path::new(A)).await;

    assert_eq!(result, Reconciliation::Reloaded);
    assert_eq!(h.content(tab), "v2");
    assert!(!h.is_dirty(tab));
    assert_eq!(h.draft(A).await, None);
    assert_eq!(h.prompt_count(), 0);
    assert!(h.events().iter().any(
        |e| matches!(e, SyncEvent::Reloaded { content, .. } if content == "v2")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_dirty_tab_prompts_once() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "local".into()).unwrap();
    sleep_ms(600).await;

    h.fs.set_external(A, "v2");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Prompted
    );
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::AlreadyPrompted
    );
    h.fs.set_external(A, "v3");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::AlreadyPrompted
    );

    assert_eq!(h.prompt_count(), 1);
    assert_eq!(h.content(tab), "local");
    assert!(h.engine.tab(tab).unwrap().status.is_conflict_pending());
}

#[tokio::test(start_paused = true)]
async fn test_unsaved_buffer_prompts_before_draft_timer() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "typing".into()).unwrap();

    h.fs.set_external(A, "v2");
    let result = h.engine.handle_file_changed(Path::new(A)).await;

    assert_eq!(result, Reconciliation::Prompted);
    assert_eq!(h.content(tab), "typing");
}

#[tokio::test(start_paused = true)]
async fn test_prompt_reload_takes_disk() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "local".into()).unwrap();
    sleep_ms(600).await;
    h.fs.set_external(A, "v2");
    h.engine.handle_file_changed(Path::new(A)).await;

    h.engine
        .resolve_prompt(&doc(A), PromptResolution::Reload)
        .await
        .unwrap();

    assert_eq!(h.content(tab), "v2");
    assert_eq!(h.draft(A).await, None);
    assert_eq!(h.engine.tab(tab).unwrap().status, TabStatus::Clean);
    assert!(h.events().iter().any(|e| matches!(
        e,
        SyncEvent::PromptResolved {
            resolution: PromptResolution::Reload,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_reload_keeps_edits_when_draft_removal_fails() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "local".into()).unwrap();
    sleep_ms(600).await;
    h.fs.set_external(A, "v2");
    h.engine.handle_file_changed(Path::new(A)).await;
    h.clear_events();
    h.drafts.set_failing(true);

    let result = h
        .engine
        .resolve_prompt(&doc(A), PromptResolution::Reload)
        .await;

    assert!(matches!(result, Err(EngineError::Draft(_))));
    assert!(h.is_dirty(tab));
    assert_eq!(h.content(tab), "local");
    assert!(h.engine.tab(tab).unwrap().status.is_conflict_pending());
    assert!(h.events().is_empty());

    // The prompt is still pending, so the user can retry.
    h.drafts.set_failing(false);
    assert_eq!(h.draft(A).await.as_deref(), Some("local"));
    h.engine
        .resolve_prompt(&doc(A), PromptResolution::Reload)
        .await
        .unwrap();

    assert_eq!(h.content(tab), "v2");
    assert_eq!(h.draft(A).await, None);
    assert!(!h.is_dirty(tab));
}

#[tokio::test(start_paused = true)]
async fn test_prompt_keep_current_drops_duplicates() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "local".into()).unwrap();
    sleep_ms(600).await;
    h.fs.set_external(A, "v2");
    h.engine.handle_file_changed(Path::new(A)).await;

    h.engine
        .resolve_prompt(&doc(A), PromptResolution::KeepCurrent)
        .await
        .unwrap();

    assert_eq!(h.content(tab), "local");
    assert_eq!(h.draft(A).await.as_deref(), Some("local"));
    assert!(h.is_dirty(tab));

    // Duplicate notification for the change the user already saw.
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Unchanged
    );
    assert_eq!(h.prompt_count(), 1);

    // A newer external change prompts again.
    h.fs.set_external(A, "v3");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Prompted
    );
}

#[tokio::test(start_paused = true)]
async fn test_resolve_without_prompt_fails() {
    let h = Harness::new();
    h.fs.set_external(A, "v1");
    h.engine.open_file(A, TabMode::Editable).await.unwrap();

    let result = h
        .engine
        .resolve_prompt(&doc(A), PromptResolution::Dismiss)
        .await;

    assert!(matches!(result, Err(EngineError::NoPendingPrompt(_))));
}

#[tokio::test(start_paused = true)]
async fn test_save_resolves_pending_prompt_as_keep_current() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "local".into()).unwrap();
    sleep_ms(600).await;
    h.fs.set_external(A, "v2");
    h.engine.handle_file_changed(Path::new(A)).await;

    assert_eq!(h.engine.save(tab).await.unwrap(), SaveOutcome::Saved);

    assert_eq!(h.fs.contents(A).as_deref(), Some("local"));
    assert_eq!(h.engine.tab(tab).unwrap().status, TabStatus::Clean);
}

#[tokio::test(start_paused = true)]
async fn test_discard_during_conflict_takes_external() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "local".into()).unwrap();
    sleep_ms(600).await;
    assert_eq!(
        h.engine.get_draft_content(&doc(A)).await.unwrap().as_deref(),
        Some("local")
    );
    h.fs.set_external(A, "v2");
    h.engine.handle_file_changed(Path::new(A)).await;

    h.engine.discard_draft(&doc(A)).await.unwrap();

    assert_eq!(h.content(tab), "v2");
    assert_eq!(h.engine.get_draft_content(&doc(A)).await.unwrap(), None);
    assert_eq!(h.engine.tab(tab).unwrap().status, TabStatus::Clean);
    assert_eq!(h.fs.contents(A).as_deref(), Some("v2"));
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Unchanged
    );
}

#[tokio::test(start_paused = true)]
async fn test_own_write_is_suppressed_then_recognized_as_echo() {
    let h = Harness::new();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    h.engine.content_changed(tab, "mine".into()).unwrap();
    sleep_ms(1100).await;
    assert_eq!(h.fs.contents(A).as_deref(), Some("mine"));

    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Suppressed
    );

    // Late echo after the window closed.
    sleep_ms(1000).await;
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Echo
    );
    assert_eq!(h.prompt_count(), 0);
    assert_eq!(h.content(tab), "mine");
}

#[tokio::test(start_paused = true)]
async fn test_revert_to_our_last_write_after_reload_is_applied() {
    let h = Harness::new();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "mine".into()).unwrap();
    // Autosave at 1s, window closed by 2s.
    sleep_ms(2500).await;
    assert_eq!(h.fs.contents(A).as_deref(), Some("mine"));

    h.fs.set_external(A, "theirs");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Reloaded
    );

    h.fs.set_external(A, "mine");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Reloaded
    );
    assert_eq!(h.content(tab), "mine");
    assert!(!h.is_dirty(tab));

    // Nothing stale is written back on the next edit.
    h.engine.content_changed(tab, "mine, edited".into()).unwrap();
    sleep_ms(1500).await;
    assert_eq!(h.fs.contents(A).as_deref(), Some("mine, edited"));
}

#[tokio::test(start_paused = true)]
async fn test_revert_after_keep_current_prompts() {
    let h = Harness::new();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "mine".into()).unwrap();
    sleep_ms(2500).await;

    h.engine.content_changed(tab, "mine, more".into()).unwrap();
    sleep_ms(600).await;
    h.fs.set_external(A, "theirs");
    h.engine.handle_file_changed(Path::new(A)).await;
    h.engine
        .resolve_prompt(&doc(A), PromptResolution::KeepCurrent)
        .await
        .unwrap();

    h.fs.set_external(A, "mine");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Prompted
    );
    assert_eq!(h.prompt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_external_edit_after_shortened_window_is_handled() {
    let h = Harness::new();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.update_settings(SyncSettings {
        suppression_window_ms: 200,
        ..SyncSettings::default()
    });

    h.engine.content_changed(tab, "mine".into()).unwrap();
    sleep_ms(1100).await;
    assert_eq!(h.fs.contents(A).as_deref(), Some("mine"));

    h.fs.set_external(A, "theirs");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Suppressed
    );

    // Past the 200ms window but well inside the default one.
    sleep_ms(150).await;
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Reloaded
    );
    assert_eq!(h.content(tab), "theirs");
    assert_eq!(h.prompt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_inactive_path_is_ignored() {
    let h = Harness::new();
    h.fs.set_external(A, "a");
    h.fs.set_external(B, "b");
    h.engine.open_file(A, TabMode::Editable).await.unwrap();
    h.engine.open_file(B, TabMode::Editable).await.unwrap();

    h.fs.set_external(A, "a2");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::NotActive
    );
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_changes_nothing() {
    let h = Harness::new();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    h.fs.fail_reads(A, true);
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::ReadFailed
    );

    assert_eq!(h.content(tab), "v1");
    assert!(
        h.events()
            .iter()
            .any(|e| matches!(e, SyncEvent::ReadFailed { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_read_only_tab_always_prompts() {
    let h = Harness::new();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::ReadOnly).await.unwrap().tab_id;

    assert!(matches!(
        h.engine.content_changed(tab, "x".into()),
        Err(EngineError::ReadOnly(_))
    ));

    h.fs.set_external(A, "v2");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::Prompted
    );
    assert!(!h.is_dirty(tab));

    h.engine
        .resolve_prompt(&doc(A), PromptResolution::Reload)
        .await
        .unwrap();
    assert_eq!(h.content(tab), "v2");
}

// ---- Tabs ----

#[tokio::test(start_paused = true)]
async fn test_open_recovers_differing_draft() {
    let h = Harness::new();
    h.fs.set_external(A, "disk");
    h.drafts.save_draft(&doc(A), "recovered").await.unwrap();

    let opened = h.engine.open_file(A, TabMode::Editable).await.unwrap();

    assert!(opened.recovered_draft);
    assert_eq!(h.content(opened.tab_id), "recovered");
    assert!(h.is_dirty(opened.tab_id));
}

#[tokio::test(start_paused = true)]
async fn test_open_removes_stale_draft() {
    let h = Harness::new();
    h.fs.set_external(A, "same");
    h.drafts.save_draft(&doc(A), "same").await.unwrap();

    let opened = h.engine.open_file(A, TabMode::Editable).await.unwrap();

    assert!(!opened.recovered_draft);
    assert!(!h.is_dirty(opened.tab_id));
    assert_eq!(h.draft(A).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_open_twice_activates_existing() {
    let h = Harness::new();
    h.fs.set_external(A, "a");
    h.fs.set_external(B, "b");
    let first = h.engine.open_file(A, TabMode::Editable).await.unwrap();
    h.engine.open_file(B, TabMode::Editable).await.unwrap();

    let again = h.engine.open_file(A, TabMode::Editable).await.unwrap();

    assert!(again.already_open);
    assert_eq!(again.tab_id, first.tab_id);
    assert_eq!(h.engine.tabs().len(), 2);
    assert_eq!(h.watching(), Some(PathBuf::from(A)));
}

#[tokio::test(start_paused = true)]
async fn test_open_missing_file_fails() {
    let h = Harness::new();
    let result = h.engine.open_file("/doc/missing.md", TabMode::Editable).await;
    assert!(matches!(result, Err(EngineError::Fs(_))));
    assert!(h.engine.tabs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_switch_rebinds_and_keeps_timers() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "a");
    h.fs.set_external(B, "b");
    let a = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    let b = h.engine.open_file(B, TabMode::Editable).await.unwrap().tab_id;
    h.engine.switch_tab(a).await.unwrap();

    h.engine.content_changed(a, "edited a".into()).unwrap();
    h.engine.switch_tab(b).await.unwrap();
    sleep_ms(600).await;

    assert_eq!(h.draft(A).await.as_deref(), Some("edited a"));
    assert_eq!(h.watching(), Some(PathBuf::from(B)));
    assert_eq!(
        h.watch.calls(),
        vec![
            WatchCall::Start(A.into()),
            WatchCall::Stop,
            WatchCall::Start(B.into()),
            WatchCall::Stop,
            WatchCall::Start(A.into()),
            WatchCall::Stop,
            WatchCall::Start(B.into()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_dirty_tab_requires_decision() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "a");
    h.fs.set_external(B, "b");
    let a = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    let b = h.engine.open_file(B, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(b, "edited".into()).unwrap();
    sleep_ms(600).await;

    assert_eq!(
        h.engine.close_tab(b, None).await.unwrap(),
        CloseOutcome::NeedsDecision
    );
    assert_eq!(
        h.engine
            .close_tab(b, Some(CloseDecision::Cancel))
            .await
            .unwrap(),
        CloseOutcome::Cancelled
    );
    assert_eq!(h.engine.tabs().len(), 2);

    assert_eq!(
        h.engine
            .close_tab(b, Some(CloseDecision::Discard))
            .await
            .unwrap(),
        CloseOutcome::Closed
    );
    assert_eq!(h.draft(B).await, None);
    assert_eq!(h.fs.contents(B).as_deref(), Some("b"));
    assert_eq!(h.engine.active_tab().unwrap().id, a);
    assert_eq!(h.watching(), Some(PathBuf::from(A)));
}

#[tokio::test(start_paused = true)]
async fn test_close_with_save_writes_file() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "a");
    let a = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(a, "keep me".into()).unwrap();

    let outcome = h
        .engine
        .close_tab(a, Some(CloseDecision::Save))
        .await
        .unwrap();

    assert_eq!(outcome, CloseOutcome::Closed);
    assert_eq!(h.fs.contents(A).as_deref(), Some("keep me"));
    assert!(h.engine.tabs().is_empty());
    assert_eq!(h.watching(), None);

    sleep_ms(1000).await;
    assert_eq!(h.draft(A).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_close_clean_tab_needs_no_decision() {
    let h = Harness::new();
    h.fs.set_external(A, "a");
    let a = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    assert_eq!(h.engine.close_tab(a, None).await.unwrap(), CloseOutcome::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_rename_moves_draft_and_watch() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "a");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "edit".into()).unwrap();
    sleep_ms(600).await;

    h.engine
        .rename_path(Path::new(A), Path::new("/doc/renamed.md"))
        .await
        .unwrap();

    assert_eq!(h.draft(A).await, None);
    assert_eq!(h.draft("/doc/renamed.md").await.as_deref(), Some("edit"));
    let view = h.engine.tab(tab).unwrap();
    assert_eq!(view.display_name, "renamed.md");
    assert_eq!(h.watching(), Some(PathBuf::from("/doc/renamed.md")));
}

#[tokio::test(start_paused = true)]
async fn test_save_as_moves_file_tab_to_new_path() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "copy".into()).unwrap();
    sleep_ms(600).await;
    assert_eq!(h.draft(A).await.as_deref(), Some("copy"));

    h.engine.save_as(tab, B).await.unwrap();

    assert_eq!(h.fs.contents(B).as_deref(), Some("copy"));
    assert_eq!(h.fs.contents(A).as_deref(), Some("v1"));
    assert_eq!(h.draft(A).await, None);
    assert_eq!(h.draft(B).await, None);
    let view = h.engine.tab(tab).unwrap();
    assert_eq!(view.path, doc(B));
    assert_eq!(view.status, TabStatus::Clean);
    assert_eq!(h.watching(), Some(PathBuf::from(B)));

    // Change detection follows the new path.
    sleep_ms(1100).await;
    h.fs.set_external(B, "theirs");
    assert_eq!(
        h.engine.handle_file_changed(Path::new(A)).await,
        Reconciliation::NotActive
    );
    assert_eq!(
        h.engine.handle_file_changed(Path::new(B)).await,
        Reconciliation::Reloaded
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_as_keeps_tab_and_latest_draft() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "v1");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.fs.fail_writes(B, true);

    // No draft timer has fired for this edit yet.
    h.engine.content_changed(tab, "latest".into()).unwrap();
    let result = h.engine.save_as(tab, B).await;

    assert!(matches!(result, Err(EngineError::Fs(_))));
    assert_eq!(h.draft(A).await.as_deref(), Some("latest"));
    assert_eq!(h.fs.contents(B), None);
    let view = h.engine.tab(tab).unwrap();
    assert_eq!(view.path, doc(A));
    assert!(view.dirty);
    assert_eq!(h.watching(), Some(PathBuf::from(A)));
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, SyncEvent::WriteFailed { path, .. } if *path == doc(B))));
}

// ---- Untitled documents ----

#[tokio::test(start_paused = true)]
async fn test_untitled_lifecycle() {
    let h = Harness::new();
    h.fs.set_external(A, "a");
    h.engine.open_file(A, TabMode::Editable).await.unwrap();

    let tab = h.engine.new_untitled("notes.md").await.unwrap();
    assert_eq!(h.draft("UNTITLED://notes.md").await.as_deref(), Some(""));
    assert!(h.is_dirty(tab));
    assert_eq!(h.watching(), None);

    h.engine.content_changed(tab, "hello".into()).unwrap();
    sleep_ms(1500).await;
    // Untitled documents are never autosaved to disk.
    assert!(h.fs.writes().is_empty());
    assert_eq!(
        h.draft("UNTITLED://notes.md").await.as_deref(),
        Some("hello")
    );

    assert_eq!(h.engine.save(tab).await.unwrap(), SaveOutcome::NeedsSaveAs);

    h.engine.save_as(tab, "/doc/notes.md").await.unwrap();

    assert_eq!(h.fs.contents("/doc/notes.md").as_deref(), Some("hello"));
    assert_eq!(h.draft("UNTITLED://notes.md").await, None);
    let view = h.engine.tab(tab).unwrap();
    assert_eq!(view.path, doc("/doc/notes.md"));
    assert_eq!(view.status, TabStatus::Clean);
    assert_eq!(h.watching(), Some(PathBuf::from("/doc/notes.md")));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_untitled_name_rejected() {
    let h = Harness::new();
    h.engine.new_untitled("x.md").await.unwrap();

    let result = h.engine.new_untitled("x.md").await;

    assert!(matches!(result, Err(EngineError::TabExists(_))));
}

#[tokio::test(start_paused = true)]
async fn test_recover_untitled_drafts() {
    let h = Harness::new();
    h.drafts
        .save_draft(&doc("UNTITLED://old.md"), "left over")
        .await
        .unwrap();
    h.drafts.save_draft(&doc(A), "file draft").await.unwrap();

    let recovered = h.engine.recover_untitled().await.unwrap();

    assert_eq!(recovered.len(), 1);
    assert_eq!(h.content(recovered[0]), "left over");
    assert!(h.is_dirty(recovered[0]));
    assert_eq!(h.engine.list_drafts().await.unwrap().len(), 2);

    // Idempotent.
    assert!(h.engine.recover_untitled().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_untitled_with_save_needs_save_as() {
    let h = Harness::new();
    let tab = h.engine.new_untitled("draft.txt").await.unwrap();

    let outcome = h
        .engine
        .close_tab(tab, Some(CloseDecision::Save))
        .await
        .unwrap();

    assert_eq!(outcome, CloseOutcome::NeedsSaveAs);
    assert_eq!(h.engine.tabs().len(), 1);
}

// ---- Watcher and lifecycle ----

#[tokio::test(start_paused = true)]
async fn test_watch_failure_is_reported_and_editing_continues() {
    let h = Harness::manual_save();
    h.fs.set_external(A, "a");
    h.watch.set_failing(true);

    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    assert_eq!(h.engine.watched_path().await, None);
    assert!(
        h.events()
            .iter()
            .any(|e| matches!(e, SyncEvent::WatchFailed { .. }))
    );

    h.engine.content_changed(tab, "still editable".into()).unwrap();
    sleep_ms(600).await;
    assert_eq!(h.draft(A).await.as_deref(), Some("still editable"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_pending_drafts() {
    let h = Harness::new();
    h.fs.set_external(A, "a");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;

    h.engine.content_changed(tab, "last words".into()).unwrap();
    h.engine.shutdown().await;

    assert_eq!(h.draft(A).await.as_deref(), Some("last words"));
    assert_eq!(h.watching(), None);

    sleep_ms(3000).await;
    assert_eq!(h.fs.write_count(A), 0);
}

#[tokio::test(start_paused = true)]
async fn test_prompt_subscription() {
    use std::sync::{Arc, Mutex};

    let h = Harness::manual_save();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let _sub = h.engine.on_external_change_prompt(move |_, path| {
        seen_clone.lock().unwrap().push(path);
    });

    h.fs.set_external(A, "a");
    let tab = h.engine.open_file(A, TabMode::Editable).await.unwrap().tab_id;
    h.engine.content_changed(tab, "mine".into()).unwrap();
    h.fs.set_external(A, "theirs");
    h.engine.handle_file_changed(Path::new(A)).await;

    assert_eq!(*seen.lock().unwrap(), vec![doc(A)]);
}
