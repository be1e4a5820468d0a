//! Pipeline driver: listing → cards → per-card extraction → assembly →
//! validation → sink.
//!
//! Only a failed listing fetch ends a run early. Every per-card failure is
//! logged, counted, and the run moves on.

use std::fmt;

use tracing::{debug, info, warn};
use url::Url;

use crate::assemble::{validate, RecordAssembler};
use crate::cards::CardCollector;
use crate::extract::ExtractionEngine;
use crate::fetch::{FetchError, PageFetcher};
use crate::models::{Card, FieldMap, ProfileRecord};
use crate::sink::{RecordSink, SinkOutcome};
use crate::source::{SourceError, SourceProfile};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("listing page {url} could not be fetched: {error}")]
    Listing { url: String, error: FetchError },
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CollectingCards,
    ExtractingDetail,
    Assembling,
    Validating,
    Emitting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CollectingCards => "collecting-cards",
            Stage::ExtractingDetail => "extracting-detail",
            Stage::Assembling => "assembling",
            Stage::Validating => "validating",
            Stage::Emitting => "emitting",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub cards_seen: usize,
    pub duplicate_cards: usize,
    pub unresolvable_cards: usize,
    pub incomplete_cards: usize,
    pub detail_failures: usize,
    pub invalid_records: usize,
    pub stored: usize,
    pub already_present: usize,
    pub sink_failures: usize,
}

impl RunReport {
    /// Records the sink accepted, whether newly stored or already held.
    pub fn emitted(&self) -> usize {
        self.stored + self.already_present
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "emitted {} (stored {}, already present {}); cards seen {}, duplicate {}, \
             unresolvable {}, incomplete {}; detail failures {}; invalid {}; sink failures {}",
            self.emitted(),
            self.stored,
            self.already_present,
            self.cards_seen,
            self.duplicate_cards,
            self.unresolvable_cards,
            self.incomplete_cards,
            self.detail_failures,
            self.invalid_records,
            self.sink_failures,
        )
    }
}

pub struct Pipeline {
    source: SourceProfile,
    base: Url,
    collector: CardCollector,
    engine: ExtractionEngine,
    assembler: RecordAssembler,
    fetcher: Box<dyn PageFetcher>,
    sink: Box<dyn RecordSink>,
}

impl Pipeline {
    pub fn new(
        source: SourceProfile,
        fetcher: Box<dyn PageFetcher>,
        sink: Box<dyn RecordSink>,
    ) -> Result<Self, SourceError> {
        source.validate()?;
        let base = source.base()?;
        Ok(Self {
            collector: CardCollector::from_layout(&source.cards),
            engine: ExtractionEngine::for_layout(&source.profile),
            assembler: RecordAssembler::new(source.display_name.clone()),
            base,
            source,
            fetcher,
            sink,
        })
    }

    pub async fn run(&self) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();

        debug!(stage = %Stage::CollectingCards, source = %self.source.name);
        self.fetcher.warm_up().await;
        let listing_url = self.base.to_string();
        let listing = self
            .fetcher
            .fetch(&listing_url)
            .await
            .map_err(|error| RunError::Listing {
                url: listing_url.clone(),
                error,
            })?;

        let batch = self.collector.collect(&listing, &self.base);
        report.cards_seen = batch.seen;
        report.duplicate_cards = batch.duplicates;
        report.unresolvable_cards = batch.unresolvable;
        report.incomplete_cards = batch.incomplete;
        info!(
            source = %self.source.name,
            cards = batch.cards.len(),
            seen = batch.seen,
            "collected listing cards"
        );

        for card in &batch.cards {
            self.process_card(card, &mut report).await;
        }

        debug!(stage = %Stage::Done);
        info!(source = %self.source.name, "{}", report);
        Ok(report)
    }

    async fn process_card(&self, card: &Card, report: &mut RunReport) {
        debug!(stage = %Stage::ExtractingDetail, url = %card.detail_url);
        let fields = match self.fetcher.fetch(&card.detail_url).await {
            Ok(html) => self.engine.extract_html(&html),
            Err(error) => {
                warn!(url = %card.detail_url, error = %error, "detail fetch failed; using empty fields");
                report.detail_failures += 1;
                FieldMap::new()
            }
        };

        debug!(stage = %Stage::Assembling, url = %card.detail_url);
        let record = self.assembler.assemble(card, &fields);

        debug!(stage = %Stage::Validating, url = %card.detail_url);
        if let Err(error) = validate(&record) {
            warn!(url = %card.detail_url, error = %error, "dropping invalid record");
            report.invalid_records += 1;
            return;
        }

        debug!(stage = %Stage::Emitting, url = %card.detail_url);
        self.emit(&record, report).await;
    }

    async fn emit(&self, record: &ProfileRecord, report: &mut RunReport) {
        match self.sink.submit(record).await {
            Ok(SinkOutcome::Stored) => {
                info!(sink = self.sink.name(), name = %record.name, url = %record.detail_url, "stored");
                report.stored += 1;
            }
            Ok(SinkOutcome::AlreadyPresent) => {
                debug!(sink = self.sink.name(), url = %record.detail_url, "already present");
                report.already_present += 1;
            }
            Err(error) => {
                warn!(sink = self.sink.name(), url = %record.detail_url, error = %error, "submit failed");
                report.sink_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;
    use crate::models::{FieldKey, SENTINEL};
    use crate::sink::SinkError;
    use crate::source::{chatpia, madam_live};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    const BASE: &str = "https://example.jp/";

    #[derive(Clone, Default)]
    struct RecordingSink {
        records: Arc<Mutex<Vec<ProfileRecord>>>,
        reject: Option<String>,
    }

    #[async_trait]
    impl RecordSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn submit(&self, record: &ProfileRecord) -> Result<SinkOutcome, SinkError> {
            if self.reject.as_deref() == Some(record.detail_url.as_str()) {
                return Err(SinkError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(SinkOutcome::Stored)
        }
    }

    fn pipeline(fetcher: StaticFetcher, sink: RecordingSink) -> Pipeline {
        let source = madam_live().with_base_url(BASE);
        Pipeline::new(source, Box::new(fetcher), Box::new(sink)).unwrap()
    }

    const LISTING: &str = r#"<html><body>
        <div class="cast-box"><h3>Kiyomi (53歳)</h3><img src="/t/1.jpg"><a href="/profile/1">見る</a>
          <p class="comment">今夜も待ってます</p></div>
        <div class="cast-box"><p class="name">きよみ</p><a href="https://example.jp/profile/1">x</a></div>
        <div class="cast-box"><h3>Mio</h3><a href="/profile/2">見る</a></div>
    </body></html>"#;

    const DETAIL_1: &str = r#"<html><body>
        <div class="profile">
          <dl><dt>年齢</dt><dd>53歳</dd></dl>
          <dl><dt>身長</dt><dd>158cm</dd></dl>
          <table><tr><th>職業</th><td>主婦</td></tr></table>
          <span class="tag">熟女</span><span class="tag">人妻</span>
        </div>
        <div class="misc"><p>好きなタイプ</p><span>優しい人</span></div>
    </body></html>"#;

    const DETAIL_EMPTY: &str = "<html><body><p>準備中</p></body></html>";

    #[tokio::test]
    async fn test_end_to_end_dedup_and_extraction() {
        let fetcher = StaticFetcher::new()
            .with_page(BASE, LISTING)
            .with_page("https://example.jp/profile/1", DETAIL_1)
            .with_page("https://example.jp/profile/2", DETAIL_EMPTY);
        let sink = RecordingSink::default();
        let report = pipeline(fetcher, sink.clone()).run().await.unwrap();

        assert_eq!(report.cards_seen, 3);
        assert_eq!(report.duplicate_cards, 1);
        assert_eq!(report.emitted(), 2);

        let records = sink.records.lock().unwrap();
        let urls: HashSet<_> = records.iter().map(|r| r.detail_url.as_str()).collect();
        assert_eq!(urls.len(), records.len());

        let kiyomi = &records[0];
        assert_eq!(kiyomi.name, "Kiyomi");
        assert_eq!(kiyomi.thumbnail_url.as_deref(), Some("https://example.jp/t/1.jpg"));
        assert_eq!(kiyomi.one_line_comment.as_deref(), Some("今夜も待ってます"));
        assert_eq!(kiyomi.field(FieldKey::Age), "53");
        assert_eq!(kiyomi.field(FieldKey::Height), "158cm");
        assert_eq!(kiyomi.field(FieldKey::Job), "主婦");
        assert_eq!(kiyomi.field(FieldKey::FavoriteType), "優しい人");
        assert_eq!(kiyomi.field(FieldKey::Genre), "熟女, 人妻");
        assert_eq!(kiyomi.field(FieldKey::Toy), SENTINEL);
    }

    #[tokio::test]
    async fn test_page_without_profile_yields_sentinels() {
        let fetcher = StaticFetcher::new()
            .with_page(BASE, LISTING)
            .with_page("https://example.jp/profile/1", DETAIL_1)
            .with_page("https://example.jp/profile/2", DETAIL_EMPTY);
        let sink = RecordingSink::default();
        pipeline(fetcher, sink.clone()).run().await.unwrap();

        let records = sink.records.lock().unwrap();
        let mio = records
            .iter()
            .find(|r| r.detail_url == "https://example.jp/profile/2")
            .unwrap();
        assert_eq!(mio.name, "Mio");
        for key in FieldKey::ALL {
            let expected = if key == FieldKey::Genre { "Madam Live" } else { SENTINEL };
            assert_eq!(mio.field(key), expected, "field {}", key);
        }
    }

    #[tokio::test]
    async fn test_detail_failure_is_per_card() {
        // profile/2 is not served, so its fetch fails.
        let fetcher = StaticFetcher::new()
            .with_page(BASE, LISTING)
            .with_page("https://example.jp/profile/1", DETAIL_1);
        let sink = RecordingSink::default();
        let report = pipeline(fetcher, sink.clone()).run().await.unwrap();

        assert_eq!(report.detail_failures, 1);
        assert_eq!(report.stored, 2);
        let records = sink.records.lock().unwrap();
        assert_eq!(records[1].field(FieldKey::Age), SENTINEL);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_emission() {
        let fetcher = StaticFetcher::new()
            .with_page(BASE, LISTING)
            .with_page("https://example.jp/profile/1", DETAIL_1)
            .with_page("https://example.jp/profile/2", DETAIL_EMPTY);
        let sink = RecordingSink {
            reject: Some("https://example.jp/profile/1".to_string()),
            ..Default::default()
        };
        let report = pipeline(fetcher, sink.clone()).run().await.unwrap();

        assert_eq!(report.sink_failures, 1);
        assert_eq!(report.stored, 1);
        assert_eq!(sink.records.lock().unwrap()[0].name, "Mio");
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let sink = RecordingSink::default();
        let err = pipeline(StaticFetcher::new(), sink).run().await.unwrap_err();
        assert!(matches!(err, RunError::Listing { .. }));
    }

    #[tokio::test]
    async fn test_empty_listing_is_empty_report() {
        let fetcher = StaticFetcher::new().with_page(BASE, "<html><body></body></html>");
        let report = pipeline(fetcher, RecordingSink::default()).run().await.unwrap();
        assert_eq!(report, RunReport::default());
    }

    #[tokio::test]
    async fn test_nameless_record_is_dropped() {
        let listing = r#"<div class="cast-box"><h3>♡♡</h3><a href="/profile/9">x</a></div>"#;
        let fetcher = StaticFetcher::new()
            .with_page(BASE, listing)
            .with_page("https://example.jp/profile/9", DETAIL_EMPTY);
        let sink = RecordingSink::default();
        let report = pipeline(fetcher, sink.clone()).run().await.unwrap();

        assert_eq!(report.invalid_records, 1);
        assert_eq!(report.emitted(), 0);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chatpia_age_from_card_when_detail_lacks_it() {
        let listing = r#"<div class="chatbox_big">
            <div class="pict" style="background-image:url(//picture.chatpia.jp/k.jpg)"></div>
            <div class="name"><a href="/prof.php?id=k">Kiyomi</a>(53歳)</div>
            <div class="hitokoto">こんばんは</div>
        </div>"#;
        let detail = r#"<section class="life-status"><dl>
            <dt class="life-status-detail__title">身長</dt><dd class="life-status-detail__data">160cm</dd>
            <dt class="life-status-detail__title">男性のタイプ</dt><dd class="life-status-detail__data">紳士</dd>
        </dl></section>"#;
        let fetcher = StaticFetcher::new()
            .with_page(BASE, listing)
            .with_page("https://example.jp/prof.php?id=k", detail);
        let sink = RecordingSink::default();
        let source = chatpia().with_base_url(BASE);
        Pipeline::new(source, Box::new(fetcher), Box::new(sink.clone()))
            .unwrap()
            .run()
            .await
            .unwrap();

        let records = sink.records.lock().unwrap();
        let record = &records[0];
        assert_eq!(record.field(FieldKey::Age), "53");
        assert_eq!(record.field(FieldKey::Height), "160cm");
        assert_eq!(record.field(FieldKey::FavoriteType), "紳士");
        assert_eq!(record.field(FieldKey::Genre), "Chatpia");
        assert_eq!(record.thumbnail_url.as_deref(), Some("https://picture.chatpia.jp/k.jpg"));
    }
}
