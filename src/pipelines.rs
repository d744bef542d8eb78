//! Ready-made graphs built only from the public operators.
//!
//! Each pipeline comes in two flavors: over a named source bound at run time,
//! and over line-delimited files read through a caller-supplied parser.

use std::path::Path;

use compgraph_exec::Graph;
use compgraph_io::LineParser;
use compgraph_operators::filter::Filter;
use compgraph_operators::geo::{ProcessDate, StreetLength};
use compgraph_operators::map::{AddField, FilterPunctuation, LowerCase, Project, RemoveField, Split};
use compgraph_operators::reducers::{Count, FirstReducer, MeanSpeed, TermFrequency, TopN};
use compgraph_operators::stats::{InverseDocumentFrequency, Pmi, TfIdf};
use compgraph_operators::Joiner;

/// Column names for [`word_count`].
#[derive(Debug, Clone)]
pub struct WordCountColumns {
    pub text: String,
    pub count: String,
}

impl Default for WordCountColumns {
    fn default() -> Self {
        Self {
            text: "text".into(),
            count: "count".into(),
        }
    }
}

/// Counts words in `text` across all rows; output is sorted by `(count, text)`.
pub fn word_count(source: &str, cols: &WordCountColumns) -> Graph {
    word_count_over(Graph::graph_from_iter(source), cols)
}

pub fn word_count_from_file(path: impl AsRef<Path>, parser: LineParser, cols: &WordCountColumns) -> Graph {
    word_count_over(Graph::graph_from_file(path, parser), cols)
}

fn word_count_over(source: Graph, cols: &WordCountColumns) -> Graph {
    let text = cols.text.as_str();
    tokenize(&source, text)
        .sort([text])
        .reduce(Count::new(&cols.count), [text])
        .sort([cols.count.as_str(), text])
}

fn tokenize(source: &Graph, text: &str) -> Graph {
    source
        .map(FilterPunctuation::new(text))
        .map(LowerCase::new(text))
        .map(Split::new(text))
}

/// Column names for [`inverted_index`] and [`pmi`].
#[derive(Debug, Clone)]
pub struct DocumentColumns {
    pub doc: String,
    pub text: String,
    pub result: String,
}

impl DocumentColumns {
    fn with_result(result: &str) -> Self {
        Self {
            doc: "doc_id".into(),
            text: "text".into(),
            result: result.into(),
        }
    }

    pub fn tf_idf() -> Self {
        Self::with_result("tf_idf")
    }

    pub fn pmi() -> Self {
        Self::with_result("pmi")
    }
}

/// TF-IDF of every (document, word) pair; keeps the top 3 documents per word.
///
/// The source is read twice: once for the document total and once for the
/// words themselves.
pub fn inverted_index(source: &str, cols: &DocumentColumns) -> Graph {
    inverted_index_over(Graph::graph_from_iter(source), Graph::graph_from_iter(source), cols)
}

pub fn inverted_index_from_file(
    path: impl AsRef<Path>,
    parser: LineParser,
    cols: &DocumentColumns,
) -> Graph {
    let path = path.as_ref();
    inverted_index_over(
        Graph::graph_from_file(path, parser.clone()),
        Graph::graph_from_file(path, parser),
        cols,
    )
}

fn inverted_index_over(docs: Graph, words_source: Graph, cols: &DocumentColumns) -> Graph {
    let (doc, text, result) = (cols.doc.as_str(), cols.text.as_str(), cols.result.as_str());

    let words = tokenize(&words_source, text);

    let total = docs
        .map(AddField::new("tmp", 1))
        .reduce(Count::new("row_count"), ["tmp"]);

    let idf = Graph::graph_from_graph(&words)
        .sort([doc, text])
        .reduce(FirstReducer, [doc, text])
        .sort([text])
        .reduce(Count::new("doc_count"), [text])
        .map(AddField::new("tmp", 1))
        .join(Joiner::inner(), &total, ["tmp"])
        .map(RemoveField::new("tmp"))
        .map(InverseDocumentFrequency::new("row_count", "doc_count"))
        .map(Project::new([text, "idf"]))
        .sort([text]);

    Graph::graph_from_graph(&words)
        .sort([doc])
        .reduce(TermFrequency::new(text), [doc])
        .sort([text])
        .join(Joiner::left(), &idf, [text])
        .map(TfIdf::new("tf", "idf", result))
        .map(Project::new([doc, text, result]))
        .sort([text])
        .reduce(TopN::new(result, 3), [text])
}

/// Top 10 words per document by pointwise mutual information.
///
/// Only words longer than four characters that occur at least twice in a
/// document are considered.
pub fn pmi(source: &str, cols: &DocumentColumns) -> Graph {
    pmi_over(Graph::graph_from_iter(source), cols)
}

pub fn pmi_from_file(path: impl AsRef<Path>, parser: LineParser, cols: &DocumentColumns) -> Graph {
    pmi_over(Graph::graph_from_file(path, parser), cols)
}

fn pmi_over(source: Graph, cols: &DocumentColumns) -> Graph {
    let (doc, text, result) = (cols.doc.as_str(), cols.text.as_str(), cols.result.as_str());

    let word_field = cols.text.clone();
    let frequent = tokenize(&source, text)
        .sort([doc, text])
        .reduce(Count::new("count_in_doc"), [doc, text])
        .map(Filter::try_new(move |row| {
            Ok(row.get_str(&word_field)?.chars().count() > 4 && row.get_f64("count_in_doc")? >= 2.0)
        }));

    let corpus = Graph::graph_from_graph(&frequent)
        .map(AddField::new("tmp", 1))
        .sort([text])
        .reduce(
            TermFrequency::new(text).with_result("atf").with_weight("count_in_doc"),
            ["tmp"],
        )
        .map(RemoveField::new("tmp"))
        .sort([text]);

    Graph::graph_from_graph(&frequent)
        .sort([doc])
        .reduce(TermFrequency::new(text).with_weight("count_in_doc"), [doc])
        .sort([text])
        .join(Joiner::inner(), &corpus, [text])
        .map(Pmi::new("tf", "atf", result))
        .map(Project::new([doc, text, result]))
        .sort([doc])
        .reduce(TopN::new(result, 10), [doc])
}

/// Column names for [`mean_speed`].
#[derive(Debug, Clone)]
pub struct RoadColumns {
    pub enter_time: String,
    pub leave_time: String,
    pub edge_id: String,
    pub start: String,
    pub end: String,
    pub weekday: String,
    pub hour: String,
    pub speed: String,
}

impl Default for RoadColumns {
    fn default() -> Self {
        Self {
            enter_time: "enter_time".into(),
            leave_time: "leave_time".into(),
            edge_id: "edge_id".into(),
            start: "start".into(),
            end: "end".into(),
            weekday: "weekday".into(),
            hour: "hour".into(),
            speed: "speed".into(),
        }
    }
}

/// Average speed in km/h per (weekday, hour), from edge traversal times and
/// edge geometry.
pub fn mean_speed(times: &str, lengths: &str, cols: &RoadColumns) -> Graph {
    mean_speed_over(Graph::graph_from_iter(times), Graph::graph_from_iter(lengths), cols)
}

pub fn mean_speed_from_file(
    times: impl AsRef<Path>,
    lengths: impl AsRef<Path>,
    parser: LineParser,
    cols: &RoadColumns,
) -> Graph {
    mean_speed_over(
        Graph::graph_from_file(times, parser.clone()),
        Graph::graph_from_file(lengths, parser),
        cols,
    )
}

fn mean_speed_over(times: Graph, lengths: Graph, cols: &RoadColumns) -> Graph {
    let edge = cols.edge_id.as_str();
    let (weekday, hour) = (cols.weekday.as_str(), cols.hour.as_str());

    let edges = lengths
        .map(StreetLength::new(&cols.start, &cols.end).with_result("length"))
        .map(Project::new([edge, "length"]))
        .sort([edge]);

    times
        .map(ProcessDate::new(&cols.enter_time, &cols.leave_time).with_outputs(weekday, hour, "duration"))
        .map(Project::new([edge, weekday, hour, "duration"]))
        .sort([edge, weekday, hour, "duration"])
        .reduce(Count::new("count"), [edge, weekday, hour, "duration"])
        .join(Joiner::inner(), &edges, [edge])
        .map(RemoveField::new(edge))
        .sort([weekday, hour])
        .reduce(
            MeanSpeed::new("duration", "length", &cols.speed, "count"),
            [weekday, hour],
        )
}
