//! Built-in scenarios for the extraction app.
//!
//! | Name | Checks |
//! |------|--------|
//! | `citation-quick` | ✨ citation lookup from the first citation textarea |
//! | `citation-search` | ✨ citation lookup with the full marker set and field read-back |
//! | `model-availability` | model listing and the "Run All Tests" diagnostics page |
//! | `features` | document load, preprocessing data, sidebar navigation |
//! | `overlays` | overlay canvases and renderer state at full HD |
//! | `preprocessing` | preprocessing of the sample document, data export |
//! | `sidebar-integration` | sidebar population, navigation, overlay toggle, JSON export, collapse |

use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::driver::Selector;
use crate::harness::types::{Condition, Scenario, Step};
use crate::probe::Probe;
use crate::verdict::Markers;

/// Page with the model listing button
pub const MODELS_PAGE: &str = "list_available_models.html";

/// Page with the API diagnostics
pub const API_TEST_PAGE: &str = "test_gemini_api.html";

/// Citation used by the lookup scenarios
pub const SAMPLE_CITATION: &str = "Kim J, Lee JH. Suboccipital decompressive craniectomy for cerebellar infarction. Neurosurgery 2016;79(3):423-430";

/// The app's scripts have loaded
pub const APP_READY: &str = "typeof AppStateManager !== 'undefined'";

/// Every diagnostics panel shows a ✅ or ❌ outcome
pub const RESULT_PANELS_SETTLED: &str = "(() => { const panels = Array.from(document.querySelectorAll('.result')); return panels.length > 0 && panels.every(p => p.innerText.includes('✅') || p.innerText.includes('❌')); })()";

const CITATION_SUCCESS: [&str; 4] = [
    "✅ Success with Gemini 2.5 Flash + google_search",
    "✅ Success with Gemini 2.0 Flash + google_search",
    "✅ Success with Gemini 2.5 Flash (no search)",
    "Metadata auto-populated",
];

const CITATION_FAILURE: [&str; 3] = ["❌ All strategies failed", "404:", "models/gemini-1.5-flash"];

const CITATION_QUICK_SUCCESS: [&str; 1] = ["✅ Success with Gemini"];

// Failure lines the lookup prints; matched exactly, not by any "❌" plus "failed".
const CITATION_QUICK_FAILURE: [&str; 6] = [
    "❌ All strategies failed",
    "❌ Citation lookup failed",
    "❌ Citation search failed",
    "❌ Search failed",
    "❌ Lookup failed",
    "❌ Failed",
];

const PREPROCESSING_DONE: [&str; 3] = ["Preprocessing complete", "Document analyzed", "Analysis complete"];

/// Names of every built-in scenario, in display order
pub const NAMES: [&str; 7] = [
    "citation-quick",
    "citation-search",
    "model-availability",
    "features",
    "overlays",
    "preprocessing",
    "sidebar-integration",
];

/// Build every scenario for the given configuration
pub fn all(config: &Config) -> Vec<Scenario> {
    NAMES.iter().filter_map(|name| find(name, config)).collect()
}

/// Build one scenario by name
pub fn find(name: &str, config: &Config) -> Option<Scenario> {
    let scenario = match name {
        "citation-quick" => citation_quick(config),
        "citation-search" => citation_search(config),
        "model-availability" => model_availability(config),
        "features" => features(config),
        "overlays" => overlays(config),
        "preprocessing" => preprocessing(config),
        "sidebar-integration" => sidebar_integration(config),
        _ => return None,
    };
    Some(
        scenario
            .element_timeout(config.browser.element_timeout)
            .navigation_timeout(config.browser.navigation_timeout),
    )
}

fn app_ready() -> Step {
    Step::wait_for(Condition::Script(APP_READY.to_string()), Duration::from_secs(10))
}

fn wait_log(needles: &[&str], seconds: u64) -> Step {
    Step::wait_for(
        Condition::log_contains(needles.iter().copied()),
        Duration::from_secs(seconds),
    )
}

/// Load the sample document unless one is already open
fn load_document_once(file_input: &str, sample: &Path) -> Step {
    Step::unless(
        Condition::Probe(Probe::DocumentLoaded),
        vec![
            Step::note("loading sample document"),
            Step::upload(Selector::css(file_input), sample),
            Step::wait_for(Condition::Probe(Probe::DocumentLoaded), Duration::from_secs(10)),
        ],
    )
}

fn read_citation_fields(selectors: [(&str, &str); 4]) -> Vec<Step> {
    selectors
        .into_iter()
        .map(|(name, css)| Step::read_field(name, Selector::css(css)))
        .collect()
}

fn citation_markers() -> Markers {
    Markers::new(CITATION_SUCCESS, CITATION_FAILURE)
}

fn citation_quick_markers() -> Markers {
    Markers::new(CITATION_QUICK_SUCCESS, CITATION_QUICK_FAILURE)
}

fn click_first_section() -> Step {
    Step::when_present(
        Selector::css("#sections-list li"),
        vec![
            Step::click(Selector::css("#sections-list li")),
            Step::wait_secs(2),
            Step::Probe(Probe::CurrentPage),
            Step::Probe(Probe::PageNumberField),
        ],
    )
}

fn citation_quick(config: &Config) -> Scenario {
    Scenario::new("citation-quick", config.target.app_url())
        .description("Paste a citation, press ✨ and read back the populated metadata")
        .markers(citation_quick_markers())
        .steps([
            app_ready(),
            Step::screenshot("initial"),
            Step::fill(Selector::css("textarea"), SAMPLE_CITATION),
            Step::screenshot("citation_filled"),
            Step::settle(),
            Step::click(Selector::with_text("button", "✨")),
            Step::note("waiting for the citation lookup"),
            wait_log(
                &[CITATION_QUICK_SUCCESS.as_slice(), CITATION_QUICK_FAILURE.as_slice()].concat(),
                30,
            ),
            Step::screenshot("after_search"),
        ])
        .steps(read_citation_fields([
            ("doi", r#"input[placeholder*="DOI"]"#),
            ("pmid", r#"input[placeholder*="PMID"]"#),
            ("journal", r#"input[placeholder*="Journal"]"#),
            ("year", r#"input[placeholder*="Year"]"#),
        ]))
}

fn citation_search(config: &Config) -> Scenario {
    Scenario::new("citation-search", config.target.app_url())
        .description("Citation lookup against the auto-loaded sample document")
        .markers(citation_markers())
        .steps([
            app_ready(),
            Step::screenshot("app_initial"),
            Step::wait_for(Condition::Probe(Probe::DocumentLoaded), Duration::from_secs(10)),
            Step::fill(
                Selector::css(r#"input[id*="citation"], input[placeholder*="Citation"]"#),
                SAMPLE_CITATION,
            ),
            Step::screenshot("before_citation_search"),
            Step::click(Selector::with_text("button", "✨")),
            Step::note("waiting for the citation lookup"),
            wait_log(&[CITATION_SUCCESS.as_slice(), CITATION_FAILURE.as_slice()].concat(), 30),
            Step::screenshot("after_citation_search"),
        ])
        .steps(read_citation_fields([
            ("doi", r#"input[id*="doi"], input[placeholder*="DOI"]"#),
            ("pmid", r#"input[id*="pmid"], input[placeholder*="PMID"]"#),
            ("journal", r#"input[id*="journal"], input[placeholder*="Journal"]"#),
            ("year", r#"input[id*="year"], input[placeholder*="Year"]"#),
        ]))
}

fn model_availability(config: &Config) -> Scenario {
    let api_page = config.target.page_url(API_TEST_PAGE);
    Scenario::new("model-availability", api_page.clone())
        .description("List the available models, then run every API diagnostic")
        .judge_result_panels(true)
        .steps([
            Step::screenshot("initial"),
            Step::settle(),
            Step::navigate(config.target.page_url(MODELS_PAGE)),
            Step::settle(),
            Step::click(Selector::with_text("button", "List All Models")),
            Step::wait_secs(5),
            Step::screenshot("available_models"),
            Step::navigate(api_page),
            Step::settle(),
            Step::click(Selector::with_text("button", "Run All Tests")),
            Step::note("waiting for the API diagnostics"),
            Step::wait_for(
                Condition::Script(RESULT_PANELS_SETTLED.to_string()),
                Duration::from_secs(60),
            ),
            Step::screenshot("results"),
            Step::Probe(Probe::ResultPanels),
            Step::SaveProbe {
                name: Probe::ResultPanels.name().to_string(),
                file_name: "gemini_test_results.json".to_string(),
            },
        ])
}

fn features(config: &Config) -> Scenario {
    Scenario::new("features", config.target.app_url())
        .description("Document load, preprocessing data, sidebar navigation and overlays")
        .markers(Markers::new(PREPROCESSING_DONE, Vec::<String>::new()))
        .steps([
            app_ready(),
            load_document_once(r#"input[type="file"]#pdf-file"#, &config.target.sample_pdf),
            Step::wait_for(
                Condition::Any(vec![
                    Condition::Probe(Probe::PreprocessingDataPresent),
                    Condition::log_contains(PREPROCESSING_DONE),
                ]),
                Duration::from_secs(10),
            ),
            Step::Probe(Probe::PreprocessingSummary),
            Step::Probe(Probe::SidebarCollapsed),
            Step::Probe(Probe::OverlayState),
            click_first_section(),
            Step::screenshot("features"),
        ])
}

fn overlays(config: &Config) -> Scenario {
    Scenario::new("overlays", config.target.app_url())
        .description("Overlay canvases and renderer state on a full HD viewport")
        .markers(Markers::new(PREPROCESSING_DONE, Vec::<String>::new()))
        .steps([
            Step::SetViewport {
                width: 1920,
                height: 1080,
            },
            app_ready(),
            wait_log(&["Preprocessing complete"], 10),
            Step::wait_secs(2),
            Step::Probe(Probe::OverlayState),
            Step::Probe(Probe::OverlayRendererStatus),
            click_first_section(),
            Step::screenshot("overlay_test"),
        ])
}

fn preprocessing(config: &Config) -> Scenario {
    Scenario::new("preprocessing", config.target.app_url())
        .description("Preprocess the sample document and export what it found")
        .markers(Markers::new(["Document analyzed", "Analysis complete"], Vec::<String>::new()))
        .highlights(["Preprocessing", "Cache", "Analysis", "sections", "tables", "citations", "📊"])
        .steps([
            app_ready(),
            Step::screenshot("initial"),
            Step::upload(Selector::css(r#"input[type="file"]"#), &config.target.sample_pdf),
            Step::settle(),
            Step::Probe(Probe::PreprocessingProgress),
            Step::note("waiting for preprocessing"),
            wait_log(&["Document analyzed", "Analysis complete"], 60),
            Step::wait_secs(2),
            Step::screenshot("complete"),
            Step::Probe(Probe::PreprocessingData),
            Step::Probe(Probe::PreprocessingSummary),
            Step::SaveProbe {
                name: Probe::PreprocessingData.name().to_string(),
                file_name: "preprocessing_results.json".to_string(),
            },
        ])
}

fn sidebar_integration(config: &Config) -> Scenario {
    let toggle_overlays = Selector::css("#toggle-overlays-btn");
    let export = Selector::css("#export-structure-btn");
    let toggle_sidebar = Selector::css("#toggle-sidebar");

    Scenario::new("sidebar-integration", config.target.app_url())
        .description("Document load through sidebar, overlays, navigation, export and collapse")
        .markers(Markers::new(PREPROCESSING_DONE, Vec::<String>::new()))
        .highlights(["Preprocessing", "Sidebar", "Overlay", "📊", "📄"])
        .steps([
            app_ready(),
            Step::screenshot("initial"),
            load_document_once(r#"input[type="file"]#pdf-file"#, &config.target.sample_pdf),
            Step::note("waiting for preprocessing"),
            Step::wait_for(
                Condition::Any(vec![
                    Condition::Probe(Probe::PreprocessingDataPresent),
                    Condition::log_contains(["Document analyzed", "Preprocessing complete"]),
                ]),
                Duration::from_secs(60),
            ),
            Step::wait_secs(2),
            Step::screenshot("sidebar_open"),
            Step::Probe(Probe::SidebarState),
            Step::Probe(Probe::OverlayState),
            Step::when_present(
                Selector::css("#sections-list li"),
                vec![
                    Step::click(Selector::css("#sections-list li")),
                    Step::wait_secs(2),
                    Step::Probe(Probe::CurrentPage),
                    Step::screenshot("navigation"),
                ],
            ),
            Step::when_present(
                toggle_overlays.clone(),
                vec![
                    Step::click(toggle_overlays.clone()),
                    Step::settle(),
                    Step::Probe(Probe::OverlayDisplay),
                    Step::screenshot("overlay_off"),
                    Step::click(toggle_overlays),
                    Step::settle(),
                    Step::screenshot("overlay_on"),
                ],
            ),
            Step::when_present(
                export.clone(),
                vec![Step::ExpectDownload {
                    trigger: export,
                    save_as: "exported_structure.json".to_string(),
                    timeout: Duration::from_secs(10),
                    validate_json: true,
                }],
            ),
            Step::when_present(
                toggle_sidebar.clone(),
                vec![
                    Step::click(toggle_sidebar.clone()),
                    Step::settle(),
                    Step::Probe(Probe::SidebarCollapsed),
                    Step::screenshot("collapsed"),
                    Step::click(toggle_sidebar),
                    Step::settle(),
                    Step::screenshot("expanded"),
                ],
            ),
        ])
}
