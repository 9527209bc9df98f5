use crate::builder::ArchiveBuilder;
use crate::config::Config;
use crate::planner::plan_windows;
use crate::registry::TalkgroupRegistry;
use crate::types::{
    MergeTask, RecordingDescriptor, RunSummary, TalkgroupId, TaskOutcome, TaskReport,
};
use anyhow::{Context, Result};
use chrono::TimeZone;
use crossbeam_channel::{bounded, unbounded};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Merge Scheduler (並行実行コーディネータ)
///
/// トークグループ毎の優先度フィルタ、ウィンドウ計画、そして
/// (トークグループ, ウィンドウ) 単位のタスクを固定ワーカープールへ
/// ディスパッチする。タスク同士は独立で、順序保証はない。
/// 各タスクの出力パスは (トークグループ, ウィンドウ開始) から
/// 一意に決まるため書き込み競合も起きない。
///
/// タスク内のエラーはスレッド境界を越えて伝播させず、
/// `TaskReport` として報告チャネル経由で集約する。
pub struct MergeScheduler<'a> {
    config: &'a Config,
    registry: &'a TalkgroupRegistry,
}

impl<'a> MergeScheduler<'a> {
    pub fn new(config: &'a Config, registry: &'a TalkgroupRegistry) -> Self {
        Self { config, registry }
    }

    /// 全トークグループの結合を実行して集計を返す
    ///
    /// `running` が false になると、実行中のタスクは完走させ、
    /// 未投入のタスクは破棄して終了する。
    ///
    /// # Errors
    ///
    /// 出力ディレクトリが作成できない場合にエラーを返す (致命的)。
    /// 個々のタスクの失敗は集計に記録され、エラーにはならない。
    pub fn run(
        &self,
        index: BTreeMap<TalkgroupId, Vec<RecordingDescriptor>>,
        running: &AtomicBool,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let tasks = self.create_tasks(index, &mut summary)?;

        if tasks.is_empty() {
            log::info!("実行するタスクがありません");
            return Ok(summary);
        }

        log::info!(
            "タスク {} 件をワーカー {} 本で処理します",
            tasks.len(),
            self.config.scheduler.num_threads
        );

        let (task_tx, task_rx) = bounded::<MergeTask>(self.config.scheduler.num_threads * 2);
        let (report_tx, report_rx) = unbounded::<TaskReport>();

        thread::scope(|scope| {
            for worker_id in 0..self.config.scheduler.num_threads {
                let task_rx = task_rx.clone();
                let report_tx = report_tx.clone();
                let merge = &self.config.merge;
                let remove_sources = self.config.scheduler.remove_sources;

                scope.spawn(move || {
                    let builder = ArchiveBuilder::new(merge.sample_rate, merge.normalize);
                    for task in task_rx.iter() {
                        log::debug!(
                            "ワーカー {}: TG {} ウィンドウ {} を開始",
                            worker_id,
                            task.window.talkgroup,
                            task.window.start
                        );
                        let report =
                            run_task(&builder, &task, merge.keep_empty, remove_sources);
                        if report_tx.send(report).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(report_tx);

            // プロデューサ: 停止シグナルを確認しながらタスクを投入する。
            // 実行中のタスクは完走させ、未投入分だけを破棄する
            let mut drained = 0usize;
            let total = tasks.len();
            for task in tasks {
                if !running.load(Ordering::SeqCst) {
                    drained += 1;
                    continue;
                }
                if task_tx.send(task).is_err() {
                    break;
                }
            }
            drop(task_tx);

            if drained > 0 {
                log::warn!(
                    "停止シグナルによりタスク {} / {} 件を破棄しました",
                    drained,
                    total
                );
            }

            for report in report_rx.iter() {
                match &report.outcome {
                    TaskOutcome::Built => {
                        log::debug!(
                            "TG {} ウィンドウ {}: アーカイブ書き出し完了",
                            report.talkgroup,
                            report.window_start
                        );
                    }
                    TaskOutcome::SkippedEmpty => {
                        log::debug!(
                            "TG {} ウィンドウ {}: 音声なしのため出力を省略",
                            report.talkgroup,
                            report.window_start
                        );
                    }
                    TaskOutcome::Failed(e) => {
                        log::error!(
                            "TG {} ウィンドウ {}: タスク失敗 ({})",
                            report.talkgroup,
                            report.window_start,
                            e
                        );
                    }
                }
                summary.record(&report.outcome);
            }
        });

        log::info!(
            "完了: 作成 {} / 空スキップ {} / 失敗 {} / 除外トークグループ {}",
            summary.built,
            summary.skipped_empty,
            summary.failed,
            summary.talkgroups_skipped
        );

        Ok(summary)
    }

    /// トークグループ毎のフィルタリングとウィンドウ計画からタスク列を生成
    ///
    /// 優先度フィルタはトークグループ単位の属性なので、ウィンドウ毎
    /// ではなくここで一度だけ行う。
    fn create_tasks(
        &self,
        index: BTreeMap<TalkgroupId, Vec<RecordingDescriptor>>,
        summary: &mut RunSummary,
    ) -> Result<Vec<MergeTask>> {
        let threshold = self.config.scheduler.priority;
        let mut tasks = Vec::new();

        for (talkgroup, recordings) in index {
            let Some(info) = self.registry.lookup(talkgroup) else {
                log::info!("TG {} はメタデータに存在しないため除外", talkgroup);
                summary.talkgroups_skipped += 1;
                continue;
            };

            if info.priority > threshold {
                log::info!(
                    "TG {} ({}) は優先度 {} > {} のため除外",
                    talkgroup,
                    info.tag,
                    info.priority,
                    threshold
                );
                summary.talkgroups_skipped += 1;
                continue;
            }

            log::info!(
                "TG {} ({}): 録音 {} 件を処理対象に追加",
                talkgroup,
                info.tag,
                recordings.len()
            );

            let dir = self.talkgroup_dir(talkgroup, &info.tag);
            fs::create_dir_all(&dir)
                .with_context(|| format!("出力ディレクトリの作成に失敗: {:?}", dir))?;

            let windows =
                plan_windows(talkgroup, &recordings, self.config.merge.window_length_secs);
            log::info!("TG {} ({}): ウィンドウ {} 件を計画", talkgroup, info.tag, windows.len());

            for window in windows {
                let output_path =
                    self.output_path(&dir, talkgroup, &info.tag, window.start)?;
                tasks.push(MergeTask {
                    window,
                    tag: info.tag.clone(),
                    output_path,
                });
            }
        }

        Ok(tasks)
    }

    /// トークグループ毎の出力ディレクトリ `<id>_<tag>/`
    fn talkgroup_dir(&self, talkgroup: TalkgroupId, tag: &str) -> PathBuf {
        PathBuf::from(&self.config.paths.output_dir).join(format!("{}_{}", talkgroup, tag))
    }

    /// 決定的な出力ファイルパス `<id>_<tag>_<YYYYmmdd-HHMMSS>.wav`
    ///
    /// (トークグループ, ウィンドウ開始) から一意に決まるため、
    /// 再実行しても衝突せず同じパスに上書きされる。
    fn output_path(
        &self,
        dir: &std::path::Path,
        talkgroup: TalkgroupId,
        tag: &str,
        window_start: i64,
    ) -> Result<PathBuf> {
        let dt = chrono::Local
            .timestamp_opt(window_start, 0)
            .single()
            .with_context(|| format!("不正なウィンドウ開始時刻: {}", window_start))?;
        let filename = format!("{}_{}_{}.wav", talkgroup, tag, dt.format("%Y%m%d-%H%M%S"));
        Ok(dir.join(filename))
    }
}

/// タスク1件の実行: queued → running → completed | failed
///
/// 入力ファイルの削除はタスクが completed に達した後にのみ行う。
/// 失敗したタスクの入力は削除されないため、失敗がデータ損失に
/// つながることはない。
fn run_task(
    builder: &ArchiveBuilder,
    task: &MergeTask,
    keep_empty: bool,
    remove_sources: bool,
) -> TaskReport {
    let talkgroup = task.window.talkgroup;
    let window_start = task.window.start;

    let archive = match builder.build(&task.window) {
        Ok(archive) => archive,
        Err(e) => {
            return TaskReport {
                talkgroup,
                window_start,
                outcome: TaskOutcome::Failed(format!("{:#}", e)),
            };
        }
    };

    let outcome = if !archive.has_audio && !keep_empty {
        // 書いてから消すのではなく、最初から書かない
        TaskOutcome::SkippedEmpty
    } else {
        match builder.write(&archive, &task.output_path) {
            Ok(()) => TaskOutcome::Built,
            Err(e) => {
                return TaskReport {
                    talkgroup,
                    window_start,
                    outcome: TaskOutcome::Failed(format!("{:#}", e)),
                };
            }
        }
    };

    // ここに到達した時点でタスクは completed
    if remove_sources {
        for entry in &task.window.entries {
            let path = &entry.recording.path;
            log::debug!("入力ファイルを削除: {:?}", path);
            if let Err(e) = fs::remove_file(path) {
                log::warn!("入力ファイルを削除できませんでした: {:?} ({})", path, e);
            }
        }
    }

    TaskReport {
        talkgroup,
        window_start,
        outcome,
    }
}
