use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 実行全体の設定
///
/// 起動時に一度だけ構築され、以降は不変のまま各コンポーネントへ
/// 参照渡しされる。プロセス全域の可変シングルトンは持たない。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// 入出力パス設定
///
/// # デフォルト値
///
/// - `trunk_csv`: "" (CLIでの指定が必須)
/// - `input_dir`: "" (CLIでの指定が必須)
/// - `output_dir`: "./" (カレントディレクトリ)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// trunk-recorder の talkgroup CSV ファイル
    #[serde(default)]
    pub trunk_csv: String,

    /// 録音アーカイブのルートディレクトリ (再帰的に探索する)
    #[serde(default)]
    pub input_dir: String,

    /// 結合アーカイブの出力先ディレクトリ
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

/// 結合処理設定
///
/// # デフォルト値
///
/// - `window_length_secs`: 1800 秒 (30分ウィンドウ)
/// - `sample_rate`: 8000 Hz (trunk-recorder のネイティブレート)
/// - `normalize`: false
/// - `keep_empty`: false (無音のみのウィンドウは出力しない)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MergeConfig {
    /// 出力ウィンドウ長 (秒)
    #[serde(default = "default_window_length_secs")]
    pub window_length_secs: u32,

    /// 出力サンプリングレート (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// 結合後バッファへのピークノーマライズを行うか
    #[serde(default)]
    pub normalize: bool,

    /// 録音を含まないウィンドウも無音ファイルとして出力するか
    #[serde(default)]
    pub keep_empty: bool,
}

/// スケジューラ設定
///
/// # デフォルト値
///
/// - `num_threads`: 4
/// - `priority`: 3 (この値以下の優先度のトークグループを処理する)
/// - `remove_sources`: false
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// 並列ワーカースレッド数
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// 処理対象とする最低優先度 (この値を含む)
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// 結合完了後に入力ファイルを削除するか
    ///
    /// タスクが completed に達した場合にのみ削除される
    #[serde(default)]
    pub remove_sources: bool,
}

// Default functions
fn default_output_dir() -> String {
    "./".to_string()
}

fn default_window_length_secs() -> u32 {
    1800 // 30分
}

fn default_sample_rate() -> u32 {
    8000 // trunk-recorder のネイティブレート
}

fn default_num_threads() -> usize {
    4
}

fn default_priority() -> i32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            merge: MergeConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            trunk_csv: String::new(),
            input_dir: String::new(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            window_length_secs: default_window_length_secs(),
            sample_rate: default_sample_rate(),
            normalize: false,
            keep_empty: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            priority: default_priority(),
            remove_sources: false,
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    ///
    /// # Errors
    ///
    /// ファイルの書き込みに失敗した場合にエラーを返す。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    /// ファイルが存在しない場合はエラーにならず、デフォルト設定を返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Config::default())
        }
    }

    /// ウィンドウ1本分のサンプル数
    pub fn window_samples(&self) -> usize {
        self.merge.window_length_secs as usize * self.merge.sample_rate as usize
    }

    /// 必須パスが揃っているか検証する
    ///
    /// # Errors
    ///
    /// talkgroup CSV または入力ディレクトリが未指定の場合にエラーを返す。
    pub fn validate(&self) -> Result<()> {
        if self.paths.trunk_csv.is_empty() {
            anyhow::bail!("talkgroup CSV が指定されていません (-t/--trunk-file)");
        }
        if self.paths.input_dir.is_empty() {
            anyhow::bail!("入力ディレクトリが指定されていません (-i/--input)");
        }
        if self.merge.window_length_secs == 0 {
            anyhow::bail!("ウィンドウ長は1秒以上が必要です");
        }
        if self.scheduler.num_threads == 0 {
            anyhow::bail!("ワーカースレッド数は1以上が必要です");
        }
        Ok(())
    }
}
