use std::path::PathBuf;

/// トークグループID
///
/// trunk-recorder が出力する10進数のトークグループ識別子。
pub type TalkgroupId = u32;

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// 発見された録音ファイル1件の記述子
///
/// trunk-recorder が出力した1回の送信に対応する。
/// Recording Index によるスキャン後は不変。
///
/// # Examples
///
/// ```
/// # use trunk_archiver::types::RecordingDescriptor;
/// # use std::path::PathBuf;
/// let rec = RecordingDescriptor {
///     talkgroup: 100,
///     start: 1_700_000_005,          // UNIX秒
///     duration_secs: 10.0,
///     path: PathBuf::from("100-1700000005_851000000.wav"),
/// };
/// assert_eq!(rec.talkgroup, 100);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingDescriptor {
    /// トークグループID
    pub talkgroup: TalkgroupId,

    /// 送信開始時刻 (UNIX秒)
    pub start: i64,

    /// 音声の長さ (秒)
    ///
    /// WAVヘッダから導出される
    pub duration_secs: f64,

    /// 録音ファイルのパス
    pub path: PathBuf,
}

/// トークグループのメタデータ1行
///
/// talkgroup CSV の1行に対応する。ロード後は不変で、
/// ワーカースレッドからロックなしで参照される。
#[derive(Clone, Debug, PartialEq)]
pub struct TalkgroupInfo {
    /// トークグループID
    pub id: TalkgroupId,

    /// 表示名 (Alpha Tag、空白は '-' に置換済み)
    pub tag: String,

    /// 優先度
    ///
    /// 数値が小さいほど重要。閾値より大きいトークグループは処理対象外
    pub priority: i32,
}

/// 出力アーカイブ1本分の固定長タイムウィンドウ
///
/// 壁時計に整列した `[start, start + length_secs)` の区間。
/// `entries` はウィンドウ先頭からのオフセット順に並ぶ。
///
/// # 不変条件
///
/// 各エントリの録音開始時刻は `[start, start + length_secs)` に収まる。
/// ウィンドウ境界をまたぐ録音は開始時刻を含むウィンドウにのみ割り当てられる
/// (分割しない)。
#[derive(Clone, Debug)]
pub struct Window {
    /// トークグループID
    pub talkgroup: TalkgroupId,

    /// ウィンドウ開始時刻 (UNIX秒、window_length の倍数に整列)
    pub start: i64,

    /// ウィンドウ長 (秒)
    pub length_secs: u32,

    /// オフセット順の録音エントリ列
    pub entries: Vec<WindowEntry>,
}

impl Window {
    /// 録音を1件も含まないか
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ウィンドウ終了時刻 (UNIX秒、排他)
    pub fn end(&self) -> i64 {
        self.start + i64::from(self.length_secs)
    }
}

/// ウィンドウ内の録音1件
#[derive(Clone, Debug)]
pub struct WindowEntry {
    /// ウィンドウ先頭からのオフセット (秒)
    pub offset_secs: f64,

    /// 対象の録音
    pub recording: RecordingDescriptor,
}

/// 結合済みアーカイブ
///
/// 1つのウィンドウに対する連続音声ストリーム。
/// バッファ長は正確に `window_length * sample_rate` サンプル。
#[derive(Clone, Debug)]
pub struct MergedArchive {
    /// トークグループID
    pub talkgroup: TalkgroupId,

    /// ウィンドウ開始時刻 (UNIX秒)
    pub window_start: i64,

    /// モノラルPCMサンプル列
    pub samples: Vec<SampleI16>,

    /// サンプリングレート (Hz)
    pub sample_rate: u32,

    /// いずれかの録音が非ゼロサンプルを寄与したか
    ///
    /// false の場合、keep-empty が指定されない限り出力は破棄される
    pub has_audio: bool,
}

/// MergeTask のライフサイクル状態
///
/// queued → running → completed | failed と遷移する。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// キュー投入済み、未実行
    Queued,

    /// ワーカーで実行中
    Running,

    /// 正常完了 (空アーカイブの破棄も完了扱い)
    Completed,

    /// 失敗 (読込・デコード・書込エラー)
    Failed,
}

/// スケジューリング単位: 1つの (トークグループ, ウィンドウ) ペア
#[derive(Clone, Debug)]
pub struct MergeTask {
    /// 対象ウィンドウ
    pub window: Window,

    /// トークグループの表示名 (出力ファイル名に使用)
    pub tag: String,

    /// 出力先ファイルパス
    pub output_path: PathBuf,
}

/// タスク1件の実行結果
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    /// アーカイブを書き出した
    Built,

    /// 空アーカイブのため書き出しを省略した
    SkippedEmpty,

    /// 失敗した (エラーメッセージ付き)
    Failed(String),
}

/// ワーカーからスケジューラへ返すタスク報告
///
/// スレッド境界を越える例外伝播の代わりに、結果を値として集約する。
#[derive(Clone, Debug)]
pub struct TaskReport {
    /// トークグループID
    pub talkgroup: TalkgroupId,

    /// ウィンドウ開始時刻 (UNIX秒)
    pub window_start: i64,

    /// 実行結果
    pub outcome: TaskOutcome,
}

/// 実行全体の集計
///
/// ワーカー毎に加算し、最後にマージする。
///
/// # Examples
///
/// ```
/// # use trunk_archiver::types::RunSummary;
/// let mut a = RunSummary::default();
/// a.built = 3;
/// let mut b = RunSummary::default();
/// b.failed = 1;
/// a.merge(&b);
/// assert_eq!(a.built, 3);
/// assert!(!a.is_success());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 書き出したアーカイブ数
    pub built: usize,

    /// 空のため省略したアーカイブ数
    pub skipped_empty: usize,

    /// 失敗したタスク数
    pub failed: usize,

    /// 優先度・メタデータ不在により除外したトークグループ数
    pub talkgroups_skipped: usize,
}

impl RunSummary {
    /// 別の集計を加算する
    pub fn merge(&mut self, other: &RunSummary) {
        self.built += other.built;
        self.skipped_empty += other.skipped_empty;
        self.failed += other.failed;
        self.talkgroups_skipped += other.talkgroups_skipped;
    }

    /// 1件のタスク報告を反映する
    pub fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Built => self.built += 1,
            TaskOutcome::SkippedEmpty => self.skipped_empty += 1,
            TaskOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// 全タスクが成功または正当にスキップされたか
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}
