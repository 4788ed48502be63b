//! Prompt templates and reply parsing.
//!
//! Templates use `{name}` placeholders filled by [`fill`]. Literal braces in
//! JSON examples are left alone because only known names are substituted.

use serde::de::DeserializeOwned;
use tracing::warn;

pub const TUPLE_DELIMITER: &str = "<|>";
pub const RECORD_DELIMITER: &str = "##";
pub const COMPLETION_DELIMITER: &str = "<|COMPLETE|>";

/// Answer returned when nothing relevant could be retrieved.
pub const FAIL_RESPONSE: &str = "Sorry, I'm not able to provide an answer to that question.";

pub const LOCAL_RAG_SYSTEM: &str = "You need to answer questions based on the provided knowledge.";

pub const CHUNK_SUMMARY: &str = r#"Read the text below and rewrite it as a plain-prose summary.

Requirements:
1. Keep as many of the facts as possible, including every number and date.
2. Name entities explicitly instead of using pronouns.
3. No lists, headings, quotation marks or other markup; write ordinary paragraphs.
4. Output the summary directly, without an introduction such as "Here is the summary".

Text:
{text}

Summary:
"#;

pub const ENTITY_EXTRACTION: &str = r#"-Goal-
Given a text and a list of entity types, find every entity of those types in the text and every relationship between the entities you found.

-Steps-
1. For each entity, output
("entity"{tuple_delimiter}<entity_name>{tuple_delimiter}<entity_type>{tuple_delimiter}<entity_description>)
where entity_name is capitalized, entity_type is one of [{entity_types}] and entity_description covers the entity's attributes and activities.

2. For each pair of entities from step 1 that are clearly related, output
("relationship"{tuple_delimiter}<source_entity>{tuple_delimiter}<target_entity>{tuple_delimiter}<relationship_description>{tuple_delimiter}<relationship_strength>)
where relationship_strength is a number scoring how strongly the two are related.

3. Write everything in English as one list, separating records with {record_delimiter}.

4. Finish with {completion_delimiter}

-Example-
Entity_types: [organization, person, geo]
Text: In 2022 Audi delivered 1.6 million cars from its plant in Ingolstadt.
Output:
("entity"{tuple_delimiter}"AUDI"{tuple_delimiter}"organization"{tuple_delimiter}"Audi is a car maker that delivered 1.6 million cars in 2022."){record_delimiter}
("entity"{tuple_delimiter}"INGOLSTADT"{tuple_delimiter}"geo"{tuple_delimiter}"Ingolstadt is the site of an Audi plant."){record_delimiter}
("relationship"{tuple_delimiter}"AUDI"{tuple_delimiter}"INGOLSTADT"{tuple_delimiter}"Audi builds cars at its Ingolstadt plant."{tuple_delimiter}8){completion_delimiter}

-Real Data-
Entity_types: [{entity_types}]
Text: {input_text}
Output:
"#;

pub const CONTINUE_EXTRACTION: &str =
    "Many entities were missed in the last extraction. Add them below using the same format:\n";

pub const IF_LOOP_EXTRACTION: &str =
    "Some entities may still be missing. Answer YES or NO: are there still entities that need to be added?\n";

pub const COMMUNITY_REPORT: &str = r#"You are helping an analyst understand one community of a knowledge graph.

Write a report from the entity, relationship and sub-report tables below. Use only facts present in the tables.

The report has:
- title: a short, specific name mentioning the key entities
- summary: an executive summary of how the entities relate
- rating: a float between 0 and 10 scoring the community's importance
- rating_explanation: one sentence justifying the rating
- findings: 5 to 10 insights, each with a short summary and a grounded explanation

Return a single JSON object:
{
    "title": "<title>",
    "summary": "<summary>",
    "rating": <rating>,
    "rating_explanation": "<rating_explanation>",
    "findings": [
        {"summary": "<insight summary>", "explanation": "<insight explanation>"}
    ]
}

Text:
```
{input_text}
```

Output:
"#;

pub const LOCAL_RAG_RESPONSE: &str = r#"---Role---
You answer questions using the data tables below.

---Goal---
Answer the question from the tables. If the tables do not contain the answer, say 'I'm sorry I don't know the answer'.

---Output format---
Give only the concise conclusion, without the reasoning that led to it.

---Data tables---
question:{question}
{context_data}
"#;

pub const GLOBAL_MAP_POINTS: &str = r#"---Role---
You answer questions about the data in the tables provided.

---Goal---
Produce a list of key points answering the user's question, drawn from the community reports below. If the reports do not contain enough information, say so. Do not make anything up.

Each point has:
- description: a full description of the point
- score: an integer from 0 to 100 for how important the point is to the answer; "I don't know" points score 0

Return JSON:
{
    "points": [
        {"description": "<point>", "score": <score>}
    ]
}

---Data tables---
{context_data}
"#;

pub const GLOBAL_REDUCE: &str = r#"---Role---
You answer questions about a dataset by combining the reports of several analysts.

---Goal---
Write a response of the requested length and format that answers the user's question from the analyst reports below, which are ranked by descending importance. Drop anything irrelevant and merge the rest into one answer. If the reports are not sufficient, say so. Do not make anything up.

---Target response length and format---
{response_type}

---Analyst Reports---
{report_data}

Style the response in markdown.
"#;

pub const TEMPORAL_DECOMPOSE: &str = r#"Split the question below into sub-questions, one per time the question refers to. Times are years.

Write each sub-question as [<time><SEP><sub-question>], where <time> is a single year such as 2021 or a range such as 2010-2015. Vague periods such as "the late 1980s" become explicit ranges.

Example:
question: How did Audi's deliveries in 2022 compare with 2023?
output: [2022<SEP>How many cars did Audi deliver in 2022?][2023<SEP>How many cars did Audi deliver in 2023?]

question:{question}
output:
"#;

pub const TIME_SCOPE: &str = r#"Determine which years' data is needed to answer the question below. Times are whole years.

Answer in one of these forms:
1. Single year. "Who won the World Cup in 1998?" -> [time=1998, type=1]
2. Several years. "How does Audi's 2021 electric strategy compare to its 2012 deliveries?" -> [time=2012<SEP>2021, type=2]
3. Year range. "Who was the UK Prime Minister between 2010 and 2015?" -> [time=2010-2015, type=3]
4. Vague range, turned into explicit years. "Who was famous in the early 1900s?" -> [time=1900-1920, type=4]
5. No time can be determined. "Who is the most famous author in history?" -> [time=None, type=5]

Output exactly one [time=<time>, type=<number>] and nothing else.

question: {question}
answer:
"#;

pub const FINAL_ANSWER: &str = r#"Answer the question using the answers to its sub-questions.

question: {question}

sub-questions and answers:
{qa_pairs}

Give a concise final answer.
"#;

/// Substitute `{name}` placeholders in a single pass.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Locate the outermost JSON object in a model reply.
fn json_body(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Parse a JSON object out of a model reply, falling back to `T::default()`.
pub fn parse_json_reply<T: DeserializeOwned + Default>(reply: &str) -> T {
    let parsed = json_body(reply).map(serde_json::from_str::<T>);
    match parsed {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            warn!(error = %e, "Model reply is not valid JSON");
            T::default()
        }
        None => {
            warn!("Model reply contains no JSON object");
            T::default()
        }
    }
}
