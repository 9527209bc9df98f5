use crate::types::{MergedArchive, SampleI16, Window};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// ピークノーマライズの目標値 (-1 dBFS)
const NORMALIZE_TARGET: f32 = 0.891;

/// Archive Builder (時間正確な結合アルゴリズム)
///
/// Window Planner の出力を1本の連続音声ストリームへ変換する。
/// 正確にウィンドウ長の無音バッファを確保し、各録音をオフセット
/// 位置へ書き込む。録音間のギャップは無音のまま残る。
///
/// # 重複ポリシー
///
/// 同一トークグループの送信は重ならないはずだが、不正な入力では
/// 重なり得る。その場合は後から開始した録音が重複区間を上書きする
/// (last write wins)。ウィンドウ内の書き込みは Planner の出力順で
/// 行うため、結果は決定的である。
///
/// # 境界の切り詰め
///
/// ウィンドウ終端を越える録音はバッファ終端で切り詰める。
/// 次のウィンドウへあふれることはなく、連続アーカイブの
/// 敷き詰め不変条件を保つ。
pub struct ArchiveBuilder {
    sample_rate: u32,
    normalize: bool,
}

impl ArchiveBuilder {
    pub fn new(sample_rate: u32, normalize: bool) -> Self {
        Self {
            sample_rate,
            normalize,
        }
    }

    /// 1ウィンドウ分のアーカイブを構築
    ///
    /// # Errors
    ///
    /// いずれかの録音のオープン・デコードに失敗した場合、
    /// またはサンプリングレートが出力レートと一致しない場合に
    /// エラーを返す (タスク単位の回復可能エラー)。
    pub fn build(&self, window: &Window) -> Result<MergedArchive> {
        let total_samples = window.length_secs as usize * self.sample_rate as usize;
        let mut samples: Vec<SampleI16> = vec![0; total_samples];
        let mut has_audio = false;

        for entry in &window.entries {
            let source = decode_mono(&entry.recording.path, self.sample_rate)?;

            let start = (entry.offset_secs * f64::from(self.sample_rate)).round() as usize;
            if start >= total_samples {
                // オフセット丸めでちょうど終端に乗った場合のみ起こり得る
                log::debug!(
                    "録音がウィンドウ終端に達しているためスキップ: {:?}",
                    entry.recording.path
                );
                continue;
            }

            // ウィンドウ境界で切り詰める
            let take = source.len().min(total_samples - start);
            if take < source.len() {
                log::debug!(
                    "録音をウィンドウ境界で切り詰め: {:?} ({} / {} サンプル)",
                    entry.recording.path,
                    take,
                    source.len()
                );
            }

            // last write wins: 先行録音と重なる区間は上書きされる
            samples[start..start + take].copy_from_slice(&source[..take]);

            if !has_audio && source[..take].iter().any(|&s| s != 0) {
                has_audio = true;
            }
        }

        if self.normalize && has_audio {
            normalize_peak(&mut samples);
        }

        Ok(MergedArchive {
            talkgroup: window.talkgroup,
            window_start: window.start,
            samples,
            sample_rate: self.sample_rate,
            has_audio,
        })
    }

    /// アーカイブをWAVファイルとして書き出し
    ///
    /// 一時パスへ書いてから rename するため、途中で中断されても
    /// 書きかけのアーカイブが見えることはない。
    ///
    /// # Errors
    ///
    /// ファイルの作成・書き込み・rename に失敗した場合にエラーを返す。
    pub fn write(&self, archive: &MergedArchive, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("出力ディレクトリの作成に失敗: {:?}", parent))?;
            }
        }

        let tmp_path = path.with_extension("wav.tmp");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: archive.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&tmp_path, spec)
            .with_context(|| format!("WAVファイルの作成に失敗: {:?}", tmp_path))?;
        let mut writer16 = writer.get_i16_writer(archive.samples.len() as u32);
        for &sample in &archive.samples {
            writer16.write_sample(sample);
        }
        writer16
            .flush()
            .with_context(|| "WAVファイルへのサンプル書き込みに失敗")?;
        writer
            .finalize()
            .with_context(|| "WAVファイルのファイナライズに失敗")?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("アーカイブの配置に失敗: {:?}", path))?;

        Ok(())
    }
}

/// WAVファイルをモノラルi16サンプル列としてデコード
///
/// マルチチャンネル音声は各フレームの平均でモノラルに落とす。
/// サンプリングレートが出力レートと異なる場合はエラー
/// (リサンプルはトランスコードにあたるため行わない)。
fn decode_mono(path: &Path, expected_rate: u32) -> Result<Vec<SampleI16>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("録音ファイルのオープンに失敗: {:?}", path))?;
    let spec = reader.spec();

    if spec.sample_rate != expected_rate {
        anyhow::bail!(
            "サンプリングレート不一致: {:?} は {} Hz (出力は {} Hz)",
            path,
            spec.sample_rate,
            expected_rate
        );
    }
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!(
            "未対応のサンプル形式: {:?} ({} bit {:?})",
            path,
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let channels = usize::from(spec.channels.max(1));
    let mut samples = Vec::with_capacity(reader.duration() as usize);
    let mut frame_acc: i32 = 0;
    let mut frame_len = 0usize;

    for sample in reader.samples::<i16>() {
        let sample =
            sample.with_context(|| format!("録音ファイルのデコードに失敗: {:?}", path))?;
        frame_acc += i32::from(sample);
        frame_len += 1;
        if frame_len == channels {
            samples.push((frame_acc / channels as i32) as i16);
            frame_acc = 0;
            frame_len = 0;
        }
    }

    Ok(samples)
}

/// 結合済みバッファ全体へのピークノーマライズ
///
/// 個々の録音単位ではなく完成したバッファに対して一度だけ適用する。
/// これにより結合結果全体のダイナミクスが反映される。
fn normalize_peak(samples: &mut [SampleI16]) {
    let peak = samples.iter().map(|&s| i32::from(s).abs()).max().unwrap_or(0);
    if peak == 0 {
        return;
    }

    let gain = f32::from(i16::MAX) * NORMALIZE_TARGET / peak as f32;
    log::debug!("ピークノーマライズ: peak={} gain={:.3}", peak, gain);

    for sample in samples.iter_mut() {
        let scaled = (f32::from(*sample) * gain).round();
        *sample = scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordingDescriptor, WindowEntry};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const RATE: u32 = 100; // テスト用の小さなレート

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn entry(path: PathBuf, start: i64, offset_secs: f64, duration_secs: f64) -> WindowEntry {
        WindowEntry {
            offset_secs,
            recording: RecordingDescriptor {
                talkgroup: 100,
                start,
                duration_secs,
                path,
            },
        }
    }

    fn window(start: i64, length_secs: u32, entries: Vec<WindowEntry>) -> Window {
        Window {
            talkgroup: 100,
            start,
            length_secs,
            entries,
        }
    }

    #[test]
    fn test_build_places_at_offset() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("100-5_851000000.wav");
        write_wav(&path, 1, &[1000i16; 200]); // 2秒

        let builder = ArchiveBuilder::new(RATE, false);
        let w = window(0, 30, vec![entry(path, 5, 5.0, 2.0)]);
        let archive = builder.build(&w).unwrap();

        assert_eq!(archive.samples.len(), 30 * RATE as usize);
        assert!(archive.has_audio);

        // [0, 5秒) は無音
        assert!(archive.samples[..500].iter().all(|&s| s == 0));
        // [5秒, 7秒) は録音
        assert!(archive.samples[500..700].iter().all(|&s| s == 1000));
        // [7秒, 終端) は無音
        assert!(archive.samples[700..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_build_truncates_at_window_boundary() {
        // 29:50 開始・20秒の録音は終端の10秒で切り詰められ、
        // 次のウィンドウには現れない
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("100-1790_851000000.wav");
        write_wav(&path, 1, &[2000i16; 20 * RATE as usize]);

        let builder = ArchiveBuilder::new(RATE, false);
        let w = window(0, 1800, vec![entry(path, 1790, 1790.0, 20.0)]);
        let archive = builder.build(&w).unwrap();

        let total = 1800 * RATE as usize;
        assert_eq!(archive.samples.len(), total);

        let boundary = 1790 * RATE as usize;
        assert!(archive.samples[boundary..].iter().all(|&s| s == 2000));
        assert!(archive.samples[..boundary].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_overlap_last_write_wins() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("100-0_851000000.wav");
        let second = temp_dir.path().join("100-1_851000000.wav");
        write_wav(&first, 1, &[100i16; 300]); // [0秒, 3秒)
        write_wav(&second, 1, &[900i16; 100]); // [1秒, 2秒)

        let builder = ArchiveBuilder::new(RATE, false);
        let w = window(
            0,
            10,
            vec![
                entry(first, 0, 0.0, 3.0),
                entry(second, 1, 1.0, 1.0),
            ],
        );
        let archive = builder.build(&w).unwrap();

        // 後から開始した録音が重複区間を上書きする
        assert!(archive.samples[0..100].iter().all(|&s| s == 100));
        assert!(archive.samples[100..200].iter().all(|&s| s == 900));
        assert!(archive.samples[200..300].iter().all(|&s| s == 100));
    }

    #[test]
    fn test_empty_window_has_no_audio() {
        let builder = ArchiveBuilder::new(RATE, false);
        let w = window(0, 10, vec![]);
        let archive = builder.build(&w).unwrap();

        assert!(!archive.has_audio);
        assert_eq!(archive.samples.len(), 10 * RATE as usize);
        assert!(archive.samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_silent_recording_flagged_empty() {
        // 全サンプルがゼロの録音は has_audio に寄与しない
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("100-0_851000000.wav");
        write_wav(&path, 1, &[0i16; 100]);

        let builder = ArchiveBuilder::new(RATE, false);
        let w = window(0, 10, vec![entry(path, 0, 0.0, 1.0)]);
        let archive = builder.build(&w).unwrap();

        assert!(!archive.has_audio);
    }

    #[test]
    fn test_stereo_mixdown() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("100-0_851000000.wav");
        // L=400, R=800 を交互に → モノラル平均 600
        let interleaved: Vec<i16> = (0..200)
            .map(|i| if i % 2 == 0 { 400 } else { 800 })
            .collect();
        write_wav(&path, 2, &interleaved);

        let builder = ArchiveBuilder::new(RATE, false);
        let w = window(0, 10, vec![entry(path, 0, 0.0, 1.0)]);
        let archive = builder.build(&w).unwrap();

        assert!(archive.samples[..100].iter().all(|&s| s == 600));
    }

    #[test]
    fn test_sample_rate_mismatch_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("100-0_851000000.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: RATE * 2,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        let builder = ArchiveBuilder::new(RATE, false);
        let w = window(0, 10, vec![entry(path, 0, 0.0, 1.0)]);
        assert!(builder.build(&w).is_err());
    }

    #[test]
    fn test_unreadable_source_fails() {
        let builder = ArchiveBuilder::new(RATE, false);
        let w = window(
            0,
            10,
            vec![entry(PathBuf::from("/nonexistent.wav"), 0, 0.0, 1.0)],
        );
        assert!(builder.build(&w).is_err());
    }

    #[test]
    fn test_normalize_applied_to_merged_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("100-0_851000000.wav");
        write_wav(&path, 1, &[1000i16; 100]);

        let builder = ArchiveBuilder::new(RATE, true);
        let w = window(0, 10, vec![entry(path, 0, 0.0, 1.0)]);
        let archive = builder.build(&w).unwrap();

        let peak = archive.samples.iter().map(|&s| i32::from(s).abs()).max().unwrap();
        let expected = (f32::from(i16::MAX) * NORMALIZE_TARGET).round() as i32;
        assert!((peak - expected).abs() <= 1);
    }

    #[test]
    fn test_write_creates_file_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let out_path = temp_dir.path().join("100_Fire/100_Fire_20231114-120000.wav");

        let builder = ArchiveBuilder::new(RATE, false);
        let archive = MergedArchive {
            talkgroup: 100,
            window_start: 0,
            samples: vec![500i16; 10 * RATE as usize],
            sample_rate: RATE,
            has_audio: true,
        };
        builder.write(&archive, &out_path).unwrap();

        assert!(out_path.exists());
        // 一時ファイルは残らない
        assert!(!out_path.with_extension("wav.tmp").exists());

        let reader = hound::WavReader::open(&out_path).unwrap();
        assert_eq!(reader.duration(), 10 * RATE);
    }

    #[test]
    fn test_write_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let out_path = temp_dir.path().join("out.wav");

        let builder = ArchiveBuilder::new(RATE, false);
        let archive = MergedArchive {
            talkgroup: 100,
            window_start: 0,
            samples: vec![123i16; RATE as usize],
            sample_rate: RATE,
            has_audio: true,
        };

        builder.write(&archive, &out_path).unwrap();
        let first = std::fs::read(&out_path).unwrap();

        builder.write(&archive, &out_path).unwrap();
        let second = std::fs::read(&out_path).unwrap();

        // 再実行でバイト単位に同一の出力
        assert_eq!(first, second);
    }
}
