use crate::types::{RecordingDescriptor, TalkgroupId};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// 録音インデックス
///
/// 入力ルートを再帰的に走査し、発見した録音ファイルを
/// トークグループ毎に分類して時刻順に並べる。
///
/// # ファイル名の契約
///
/// trunk-recorder の出力形式 `<TGID>-<UNIX秒>_<周波数>....wav` を期待する。
/// 例: `100-1700000005_851000000.wav`。
/// この形式でパースできないファイルは報告してスキップする (致命的ではない)。
///
/// # 順序の不変条件
///
/// 各トークグループ内の録音は (開始時刻, パス) の昇順で安定に並ぶ。
/// Window Planner はこの順序に依存する。
pub struct RecordingIndex;

impl RecordingIndex {
    /// 入力ルートをスキャンして録音をトークグループ毎に収集
    ///
    /// # Errors
    ///
    /// ルートが存在しない、またはディレクトリでない場合にエラーを返す。
    /// 個別エントリの読み取りエラーは警告してスキップする。
    pub fn scan<P: AsRef<Path>>(
        root: P,
    ) -> Result<BTreeMap<TalkgroupId, Vec<RecordingDescriptor>>> {
        let root = root.as_ref();
        if !root.is_dir() {
            anyhow::bail!("入力ディレクトリが見つかりません: {:?}", root);
        }

        let mut by_talkgroup: BTreeMap<TalkgroupId, Vec<RecordingDescriptor>> = BTreeMap::new();
        let mut total = 0usize;

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("エントリにアクセスできないためスキップ: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let Some((talkgroup, start)) = parse_filename(name) else {
                log::debug!("録音ファイル名としてパースできないためスキップ: {:?}", path);
                continue;
            };

            let duration_secs = match wav_duration_secs(path) {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("WAVヘッダを読み取れないためスキップ: {:?} ({})", path, e);
                    continue;
                }
            };

            by_talkgroup
                .entry(talkgroup)
                .or_default()
                .push(RecordingDescriptor {
                    talkgroup,
                    start,
                    duration_secs,
                    path: path.to_path_buf(),
                });
            total += 1;
        }

        // 安定した決定的順序: 開始時刻が同じ場合はパスで比較する
        for recordings in by_talkgroup.values_mut() {
            recordings.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.path.cmp(&b.path)));
        }

        log::info!(
            "録音 {} 件を発見しました (トークグループ {} 件)",
            total,
            by_talkgroup.len()
        );

        Ok(by_talkgroup)
    }
}

/// 録音ファイル名からトークグループIDと開始時刻を抽出
///
/// 戻り値は (トークグループID, UNIX秒)。形式が合わない場合は None。
fn parse_filename(name: &str) -> Option<(TalkgroupId, i64)> {
    if !name.ends_with(".wav") {
        return None;
    }
    let stem = name.strip_suffix(".wav")?;

    let (tg_part, rest) = stem.split_once('-')?;
    let talkgroup: TalkgroupId = tg_part.parse().ok()?;

    // タイムスタンプ部は周波数ブロックの前まで
    let ts_part = rest.split('_').next()?;
    let start: i64 = ts_part.parse().ok()?;

    Some((talkgroup, start))
}

/// WAVヘッダから録音の長さ (秒) を導出
fn wav_duration_secs(path: &Path) -> Result<f64> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("WAVファイルのオープンに失敗: {:?}", path))?;
    let spec = reader.spec();
    Ok(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}
