use crate::types::{RecordingDescriptor, TalkgroupId, Window, WindowEntry};

/// Window Planner (時間バケット化アルゴリズム)
///
/// 1トークグループ分の時刻順録音列を、壁時計に整列した固定長
/// ウィンドウへ一度の前方走査で分配する。
///
/// # アルゴリズム
///
/// 1. 各録音のウィンドウ開始 = `floor(start / length) * length`
/// 2. 開いているウィンドウと異なれば閉じて新しいウィンドウを開く
///    (入力が時刻順なので、閉じたウィンドウに戻ることはない → O(n))
/// 3. 録音をオフセット `start - window_start` で追加する
/// 4. 連続するウィンドウの間に録音のない区間があれば、空ウィンドウを
///    補完して出力がタイムライン上で正確に敷き詰められるようにする
///
/// # エッジケース
///
/// - 同一ウィンドウ内の録音間のギャップはオフセットだけで無音として
///   表現される (Archive Builder の仕事)
/// - 録音が0件なら結果も0件 (空アーカイブの義務はない)
/// - ウィンドウ長は設定値から取り、最後の録音の終端からは取らない。
///   これにより連続アーカイブがドリフトなく敷き詰められる
/// - ウィンドウ境界をまたぐ録音は開始時刻を含むウィンドウにのみ入る
pub fn plan_windows(
    talkgroup: TalkgroupId,
    recordings: &[RecordingDescriptor],
    window_length_secs: u32,
) -> Vec<Window> {
    let length = i64::from(window_length_secs);
    debug_assert!(length > 0);

    let mut windows: Vec<Window> = Vec::new();
    let mut current: Option<Window> = None;

    for recording in recordings {
        // 入力は時刻順である前提 (Recording Index の不変条件)
        debug_assert!(
            current
                .as_ref()
                .and_then(|w| w.entries.last())
                .map_or(true, |e| e.recording.start <= recording.start),
            "録音列が時刻順ではありません"
        );

        let window_start = recording.start - recording.start.rem_euclid(length);

        let reuse = matches!(&current, Some(w) if w.start == window_start);
        if !reuse {
            if let Some(closed) = current.take() {
                let mut gap_start = closed.end();
                windows.push(closed);

                // 録音のない中間ウィンドウを補完する
                while gap_start < window_start {
                    windows.push(Window {
                        talkgroup,
                        start: gap_start,
                        length_secs: window_length_secs,
                        entries: Vec::new(),
                    });
                    gap_start += length;
                }
            }

            current = Some(Window {
                talkgroup,
                start: window_start,
                length_secs: window_length_secs,
                entries: Vec::new(),
            });
        }

        if let Some(window) = current.as_mut() {
            window.entries.push(WindowEntry {
                offset_secs: (recording.start - window.start) as f64,
                recording: recording.clone(),
            });
        }
    }

    if let Some(window) = current.take() {
        windows.push(window);
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const WINDOW: u32 = 1800; // 30分

    fn rec(talkgroup: TalkgroupId, start: i64, duration_secs: f64) -> RecordingDescriptor {
        RecordingDescriptor {
            talkgroup,
            start,
            duration_secs,
            path: PathBuf::from(format!("{}-{}_851000000.wav", talkgroup, start)),
        }
    }

    #[test]
    fn test_no_recordings_no_windows() {
        let windows = plan_windows(100, &[], WINDOW);
        assert!(windows.is_empty());
    }

    #[test]
    fn test_single_recording() {
        let windows = plan_windows(100, &[rec(100, 3605, 10.0)], WINDOW);

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, 3600);
        assert_eq!(windows[0].entries.len(), 1);
        assert!((windows[0].entries[0].offset_secs - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_alignment_to_wall_clock() {
        // ウィンドウ開始は常に window_length の倍数
        let windows = plan_windows(100, &[rec(100, 1_700_000_005, 10.0)], WINDOW);
        assert_eq!(windows[0].start % i64::from(WINDOW), 0);
        assert!(windows[0].start <= 1_700_000_005);
        assert!(windows[0].end() > 1_700_000_005);
    }

    #[test]
    fn test_same_window_multiple_recordings() {
        let recordings = vec![rec(100, 5, 10.0), rec(100, 600, 15.0), rec(100, 1790, 20.0)];
        let windows = plan_windows(100, &recordings, WINDOW);

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].entries.len(), 3);
        // オフセットは録音間のギャップをそのまま表す
        assert!((windows[0].entries[1].offset_secs - 600.0).abs() < 1e-9);
        assert!((windows[0].entries[2].offset_secs - 1790.0).abs() < 1e-9);
    }

    #[test]
    fn test_windows_tile_without_gaps() {
        // 2ウィンドウ分のギャップを挟んだ録音 → 中間の空ウィンドウが補完される
        let recordings = vec![rec(100, 100, 10.0), rec(100, 1800 * 3 + 100, 10.0)];
        let windows = plan_windows(100, &recordings, WINDOW);

        assert_eq!(windows.len(), 4);
        for pair in windows.windows(2) {
            // 連続・非重複・正確に敷き詰め
            assert_eq!(pair[0].end(), pair[1].start);
        }
        assert!(!windows[0].is_empty());
        assert!(windows[1].is_empty());
        assert!(windows[2].is_empty());
        assert!(!windows[3].is_empty());
    }

    #[test]
    fn test_every_window_exact_length() {
        let recordings = vec![rec(100, 5, 10.0), rec(100, 4000, 10.0)];
        let windows = plan_windows(100, &recordings, WINDOW);

        for w in &windows {
            assert_eq!(w.length_secs, WINDOW);
            assert_eq!(w.end() - w.start, i64::from(WINDOW));
        }
    }

    #[test]
    fn test_boundary_crossing_assigned_by_start_only() {
        // 29:50 開始・20秒の録音は window 0 にのみ属する (分割しない)
        let recordings = vec![rec(100, 5, 10.0), rec(100, 1790, 20.0)];
        let windows = plan_windows(100, &recordings, WINDOW);

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, 0);
        assert_eq!(windows[0].entries.len(), 2);
    }

    #[test]
    fn test_recording_on_boundary_opens_next_window() {
        let recordings = vec![rec(100, 1799, 10.0), rec(100, 1800, 10.0)];
        let windows = plan_windows(100, &recordings, WINDOW);

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start, 0);
        assert_eq!(windows[1].start, 1800);
        assert!((windows[1].entries[0].offset_secs - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_each_recording_in_exactly_one_window() {
        let recordings = vec![
            rec(100, 5, 10.0),
            rec(100, 1790, 20.0),
            rec(100, 1810, 5.0),
            rec(100, 7205, 8.0),
        ];
        let windows = plan_windows(100, &recordings, WINDOW);

        let total: usize = windows.iter().map(|w| w.entries.len()).sum();
        assert_eq!(total, recordings.len());

        for w in &windows {
            for e in &w.entries {
                assert!(e.recording.start >= w.start);
                assert!(e.recording.start < w.end());
            }
        }
    }

    #[test]
    fn test_custom_window_length() {
        let recordings = vec![rec(100, 610, 5.0)];
        let windows = plan_windows(100, &recordings, 600);

        assert_eq!(windows[0].start, 600);
        assert!((windows[0].entries[0].offset_secs - 10.0).abs() < 1e-9);
    }
}
