//! trunk-archiver - trunk-recorder 録音の時間正確な結合アーカイバ
//!
//! このクレートは、trunk-recorder が出力する短い個別録音ファイル群を
//! トークグループ毎にまとめ、壁時計に整列した固定長ウィンドウ単位の
//! 連続アーカイブへ結合するツールを提供します。送信のなかった区間には
//! 無音が挿入され、出力は連続したスキャナ録音のように聞こえます。
//!
//! # 主な機能
//!
//! - **録音インデックス**: 入力ディレクトリを再帰走査し、ファイル名から
//!   トークグループIDと開始時刻を抽出してトークグループ毎に整列
//! - **ウィンドウ計画**: 時刻順の録音列を一度の走査で固定長ウィンドウへ分配
//! - **アーカイブ構築**: 無音バッファへのオフセット書き込みによる時間正確な結合
//! - **並行スケジューリング**: 有界キュー + 固定ワーカープールによる並列実行
//! - **優先度フィルタ**: talkgroup CSV の優先度によるトークグループ単位の絞り込み
//!
//! # アーキテクチャ
//!
//! ```text
//! [talkgroup CSV] → [TalkgroupRegistry]
//!                          ↓ (優先度フィルタ)
//! [録音ディレクトリ] → [RecordingIndex] → [plan_windows (TG毎)]
//!                                              ↓
//!                                        [MergeScheduler]
//!                                              ↓ (有界キュー)
//!                                    [ワーカー × N: ArchiveBuilder]
//!                                              ↓
//!                                     [アーカイブWAVファイル]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use trunk_archiver::config::Config;
//! use trunk_archiver::index::RecordingIndex;
//! use trunk_archiver::registry::TalkgroupRegistry;
//! use trunk_archiver::scheduler::MergeScheduler;
//! use std::sync::atomic::AtomicBool;
//!
//! let mut config = Config::default();
//! config.paths.trunk_csv = "tg.csv".to_string();
//! config.paths.input_dir = "recordings/".to_string();
//!
//! let registry = TalkgroupRegistry::load(&config.paths.trunk_csv).unwrap();
//! let index = RecordingIndex::scan(&config.paths.input_dir).unwrap();
//!
//! let scheduler = MergeScheduler::new(&config, &registry);
//! let summary = scheduler.run(index, &AtomicBool::new(true)).unwrap();
//! println!("作成: {}", summary.built);
//! ```

pub mod builder;
pub mod config;
pub mod index;
pub mod planner;
pub mod registry;
pub mod scheduler;
pub mod types;
