use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use std::fs;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use trunk_archiver::config::Config;
use trunk_archiver::index::RecordingIndex;
use trunk_archiver::registry::TalkgroupRegistry;
use trunk_archiver::scheduler::MergeScheduler;

/// trunk-recorder の個別トークグループ録音を時間正確な連続アーカイブに結合する
#[derive(Parser, Debug)]
#[command(name = "trunk-archiver", version, about)]
struct Cli {
    /// trunk-recorder の talkgroup CSV ファイル
    #[arg(short = 't', long = "trunk-file", value_name = "tg.csv")]
    trunk_file: Option<PathBuf>,

    /// 録音アーカイブのルートディレクトリ (再帰的に探索する)
    #[arg(short = 'i', long = "input", value_name = "~/recordings/")]
    input: Option<PathBuf>,

    /// 結合アーカイブの出力先ディレクトリ (デフォルト = カレントディレクトリ)
    #[arg(short = 'o', long = "output", value_name = "~/archive/")]
    output: Option<PathBuf>,

    /// 並列ワーカースレッド数 (デフォルト = 4)
    #[arg(short = 'n', long = "num-threads", value_name = "4")]
    num_threads: Option<usize>,

    /// 処理対象とする最低優先度 (この値を含む、デフォルト = 3)
    #[arg(short = 'p', long = "priority", value_name = "3")]
    priority: Option<i32>,

    /// 結合完了後に入力ファイルを削除する
    #[arg(short = 'r', long = "remove")]
    remove: bool,

    /// 録音を含まないウィンドウも無音ファイルとして出力する
    #[arg(short = 'e', long = "keep-empty")]
    keep_empty: bool,

    /// 結合後のアーカイブにピークノーマライズを適用する
    #[arg(long = "normalize")]
    normalize: bool,

    /// 出力ウィンドウ長 (秒、デフォルト = 1800)
    #[arg(long = "window-length", value_name = "SECS")]
    window_length: Option<u32>,

    /// TOML設定ファイルのパス (CLIフラグが優先される)
    #[arg(short = 'c', long = "config", value_name = "config.toml")]
    config: Option<PathBuf>,

    /// デフォルト設定ファイルを生成して終了する
    #[arg(
        long = "generate-config",
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = "config.toml"
    )]
    generate_config: Option<PathBuf>,

    /// 詳細ログを有効にする
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// 設定ファイルの値にCLIフラグを上書きして最終的なConfigを構築
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(path) = &cli.trunk_file {
        config.paths.trunk_csv = path.to_string_lossy().to_string();
    }
    if let Some(path) = &cli.input {
        config.paths.input_dir = path.to_string_lossy().to_string();
    }
    if let Some(path) = &cli.output {
        config.paths.output_dir = path.to_string_lossy().to_string();
    }
    if let Some(n) = cli.num_threads {
        config.scheduler.num_threads = n;
    }
    if let Some(p) = cli.priority {
        config.scheduler.priority = p;
    }
    if let Some(len) = cli.window_length {
        config.merge.window_length_secs = len;
    }
    if cli.remove {
        config.scheduler.remove_sources = true;
    }
    if cli.keep_empty {
        config.merge.keep_empty = true;
    }
    if cli.normalize {
        config.merge.normalize = true;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ロガーを初期化
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
    if cli.verbose {
        log::debug!("詳細ログを有効にしました");
    }

    // 設定ファイル生成モード
    if let Some(path) = &cli.generate_config {
        Config::write_default(path)?;
        println!("設定ファイルを生成しました: {}", path.display());
        return Ok(());
    }

    let config = build_config(&cli)?;

    log::info!("talkgroup CSV: {}", config.paths.trunk_csv);
    log::info!("入力ディレクトリ: {}", config.paths.input_dir);
    log::info!("出力ディレクトリ: {}", config.paths.output_dir);
    log::info!(
        "ウィンドウ長 {} 秒 / ワーカー {} 本 / 優先度閾値 {}",
        config.merge.window_length_secs,
        config.scheduler.num_threads,
        config.scheduler.priority
    );

    // 出力ルートが書き込めない場合はタスク投入前に中止する
    fs::create_dir_all(&config.paths.output_dir)
        .with_context(|| format!("出力ディレクトリを作成できません: {}", config.paths.output_dir))?;

    // メタデータが読めなければ優先度フィルタも命名もできないため即時中止
    let registry = TalkgroupRegistry::load(&config.paths.trunk_csv)?;

    // Ctrl+C ハンドラ: 実行中のタスクは完走させ、未投入分を破棄する
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let index = RecordingIndex::scan(&config.paths.input_dir)?;

    let scheduler = MergeScheduler::new(&config, &registry);
    let summary = scheduler.run(index, &running)?;

    if !summary.is_success() {
        log::error!("{} 件のタスクが失敗しました", summary.failed);
        std::process::exit(1);
    }

    Ok(())
}
