use crate::types::{TalkgroupId, TalkgroupInfo};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// トークグループレジストリ
///
/// trunk-recorder の talkgroup CSV から読み込んだメタデータの
/// 参照テーブル。ロード後は不変で、ワーカースレッドから
/// 同期なしで安全に参照できる。
///
/// # CSVフォーマット
///
/// trunk-recorder 標準のカラム配置を期待する:
/// 列0 = 10進ID、列3 = Alpha Tag、列7 = 優先度。
/// パースできない行 (ヘッダ行を含む) は警告してスキップする。
/// ファイル自体が読めない場合は致命的エラーとなり、実行全体を中止する。
pub struct TalkgroupRegistry {
    talkgroups: HashMap<TalkgroupId, TalkgroupInfo>,
}

impl TalkgroupRegistry {
    /// CSVファイルからレジストリを構築
    ///
    /// # Errors
    ///
    /// ファイルの読み込みに失敗した場合、または有効な行が
    /// 1つも含まれない場合にエラーを返す。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("talkgroup CSV の読み込みに失敗: {:?}", path.as_ref()))?;

        let mut talkgroups = HashMap::new();

        for (line_no, line) in content.lines().enumerate() {
            match parse_row(line) {
                Some(info) => {
                    log::debug!(
                        "トークグループを登録: {} ({}) 優先度 {}",
                        info.id,
                        info.tag,
                        info.priority
                    );
                    talkgroups.insert(info.id, info);
                }
                None => {
                    if !line.trim().is_empty() {
                        log::warn!("CSV {}行目をパースできないためスキップ", line_no + 1);
                        log::debug!("{}", line);
                    }
                }
            }
        }

        if talkgroups.is_empty() {
            anyhow::bail!(
                "talkgroup CSV に有効な行がありません: {:?}",
                path.as_ref()
            );
        }

        log::info!("トークグループ {} 件をロードしました", talkgroups.len());

        Ok(Self { talkgroups })
    }

    /// IDからトークグループ情報を検索
    pub fn lookup(&self, id: TalkgroupId) -> Option<&TalkgroupInfo> {
        self.talkgroups.get(&id)
    }

    /// 登録されているトークグループ数
    pub fn len(&self) -> usize {
        self.talkgroups.len()
    }

    /// レジストリが空か
    pub fn is_empty(&self) -> bool {
        self.talkgroups.is_empty()
    }
}

/// CSV1行をパースする
///
/// 列数不足・数値変換失敗は None を返す。Alpha Tag 内の空白は
/// 出力ファイル名に使うため '-' に置換する。
fn parse_row(line: &str) -> Option<TalkgroupInfo> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 8 {
        return None;
    }

    let id: TalkgroupId = fields[0].trim().parse().ok()?;
    let priority: i32 = fields[7].trim().parse().ok()?;
    let tag = fields[3].trim().replace(' ', "-");

    Some(TalkgroupInfo { id, tag, priority })
}
