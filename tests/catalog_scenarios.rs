//! Built-in scenarios played against scripted pages that behave like the app

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use study_acceptance::catalog::{self, APP_READY, RESULT_PANELS_SETTLED};
use study_acceptance::config::Config;
use study_acceptance::driver::mock::{MockHandle, MockReaction};
use study_acceptance::harness::{HarnessResult, run_scenario, with_session};
use study_acceptance::report::RunReport;
use study_acceptance::{MockDriver, MockPage, Probe, RunDir, Selector, Severity, Verdict, VerdictBasis};

struct Played {
    result: HarnessResult<RunReport>,
    handle: MockHandle,
    run: RunDir,
    _tmp: TempDir,
}

async fn play(name: &str, config: &Config, page: MockPage) -> Played {
    let scenario = catalog::find(name, config).expect("built-in scenario");
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let run = RunDir::with_name_in(tmp.path(), name);
    let driver = MockDriver::new(page);
    let handle = driver.handle();

    let result =
        with_session(driver, async |session| run_scenario(session, &scenario, &run).await).await;

    Played {
        result,
        handle,
        run,
        _tmp: tmp,
    }
}

fn sparkle() -> Selector {
    Selector::with_text("button", "✨")
}

#[tokio::test(start_paused = true)]
async fn test_citation_search_populates_metadata() {
    let fields = [
        ("doi", r#"input[id*="doi"], input[placeholder*="DOI"]"#, "10.1227/NEU.0000000000001234"),
        ("pmid", r#"input[id*="pmid"], input[placeholder*="PMID"]"#, "26985712"),
        ("journal", r#"input[id*="journal"], input[placeholder*="Journal"]"#, "Neurosurgery"),
        ("year", r#"input[id*="year"], input[placeholder*="Year"]"#, "2016"),
    ];

    let mut page = MockPage::new()
        .evaluation(APP_READY, json!(true))
        .evaluation(Probe::DocumentLoaded.expression(), json!(true))
        .element(Selector::css(
            r#"input[id*="citation"], input[placeholder*="Citation"]"#,
        ))
        .on_click(
            sparkle(),
            MockReaction::Log(
                Severity::Log,
                "✅ Success with Gemini 2.5 Flash + google_search".into(),
            ),
        );
    for (_, css, value) in fields {
        page = page
            .element(Selector::css(css))
            .on_click(sparkle(), MockReaction::SetValue(Selector::css(css), value.into()));
    }

    let played = play("citation-search", &Config::defaults(), page).await;
    let report = played.result.expect("scenario should complete");

    assert_eq!(report.verdict, Verdict::Success);
    assert_eq!(report.verdict_basis, VerdictBasis::TextHeuristic);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.checkpoints.len(), 3);
    for (name, _, value) in fields {
        assert_eq!(report.probes[name], Value::from(value), "field {}", name);
    }
    assert_eq!(
        played.handle.value_of(&Selector::css(
            r#"input[id*="citation"], input[placeholder*="Citation"]"#
        )),
        Some(catalog::SAMPLE_CITATION.to_string())
    );
    assert_eq!(played.handle.close_calls(), 1);
    assert!(played.run.summary_path().exists());
}

#[tokio::test(start_paused = true)]
async fn test_sidebar_integration_walks_the_whole_sidebar() {
    let tmp = TempDir::new().unwrap();
    let sample = tmp.path().join("sample.pdf");
    fs::write(&sample, b"%PDF-1.4").unwrap();
    let mut config = Config::defaults();
    config.target.sample_pdf = sample.clone();

    let file_input = Selector::css(r#"input[type="file"]#pdf-file"#);
    let page = MockPage::new()
        .evaluation(APP_READY, json!(true))
        .evaluation_after(
            Probe::DocumentLoaded.expression(),
            Duration::from_secs(1),
            json!(false),
            json!(true),
        )
        .log_after_navigate(
            Duration::from_secs(2),
            Severity::Log,
            "📊 Preprocessing complete: 12 sections, 4 tables",
        )
        .element(file_input.clone())
        .element(Selector::css("#sections-list li"))
        .element(Selector::css("#toggle-overlays-btn"))
        .element(Selector::css("#toggle-sidebar"))
        .on_click(
            Selector::css("#export-structure-btn"),
            MockReaction::Download {
                file_name: "document_structure.json".into(),
                contents: br#"{"metadata": {"pages": 8}, "sections": []}"#.to_vec(),
            },
        );

    let played = play("sidebar-integration", &config, page).await;
    let report = played.result.expect("scenario should complete");

    assert_eq!(report.verdict, Verdict::Success);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.checkpoints.len(), 7);
    assert_eq!(played.handle.uploads(), vec![(file_input, sample)]);

    assert_eq!(report.downloads.len(), 1);
    let download = &report.downloads[0];
    assert_eq!(download.suggested_name, "document_structure.json");
    assert!(download.path.ends_with("exported_structure.json"));
    assert!(download.path.starts_with(&played.run.dir));
    assert_eq!(
        report.probes["download:exported_structure.json"],
        json!(["metadata", "sections"])
    );

    let journal = played.handle.journal();
    let clicks = |css: &str| journal.iter().filter(|e| **e == format!("click {}", css)).count();
    assert_eq!(clicks("#toggle-overlays-btn"), 2);
    assert_eq!(clicks("#toggle-sidebar"), 2);
    assert_eq!(played.handle.close_calls(), 1);
}

fn diagnostics_page(panels: Value) -> MockPage {
    MockPage::new()
        .element(Selector::with_text("button", "List All Models"))
        .on_click(
            Selector::with_text("button", "Run All Tests"),
            MockReaction::SetEvaluation {
                expression: RESULT_PANELS_SETTLED.to_string(),
                value: json!(true),
            },
        )
        .on_click(
            Selector::with_text("button", "Run All Tests"),
            MockReaction::SetEvaluation {
                expression: Probe::ResultPanels.expression().to_string(),
                value: panels,
            },
        )
}

#[tokio::test(start_paused = true)]
async fn test_model_availability_judges_the_result_panels() {
    let page = diagnostics_page(json!([
        {"test": "Test 1", "result": "✅ listModels: 12 models"},
        {"test": "Test 2", "result": "❌ 404: models/gemini-1.5-flash is not found"},
    ]));

    let played = play("model-availability", &Config::defaults(), page).await;
    let report = played.result.expect("scenario should complete");

    assert_eq!(report.verdict, Verdict::Failure);
    assert_eq!(report.verdict_basis, VerdictBasis::PageState);
    assert!(!report.degraded);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(
        report.probes["result_panel_counts"],
        json!({"passed": 1, "failed": 1, "pending": 0})
    );

    let saved: Value = serde_json::from_str(
        &fs::read_to_string(played.run.artifact_path("gemini_test_results.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved[1]["test"], "Test 2");
}

#[tokio::test(start_paused = true)]
async fn test_model_availability_passes_when_every_panel_passes() {
    let page = diagnostics_page(json!([
        {"test": "Test 1", "result": "✅ listModels: 12 models"},
        {"test": "Test 2", "result": "✅ gemini-2.5-flash answered"},
    ]));

    let played = play("model-availability", &Config::defaults(), page).await;
    let report = played.result.expect("scenario should complete");

    assert_eq!(report.verdict, Verdict::Success);
    assert_eq!(report.verdict_basis, VerdictBasis::PageState);
}

#[tokio::test(start_paused = true)]
async fn test_model_availability_is_unclear_when_panels_never_settle() {
    let played = play(
        "model-availability",
        &Config::defaults(),
        MockPage::new()
            .element(Selector::with_text("button", "List All Models"))
            .element(Selector::with_text("button", "Run All Tests")),
    )
    .await;
    let report = played.result.expect("scenario should complete");

    assert_eq!(report.verdict, Verdict::Unclear);
    assert!(report.degraded);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, "timeout");
}
