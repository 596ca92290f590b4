//! Prompt templates for the generation stages

use super::job::{BookLength, OutlineEntry};

pub fn title_prompt(topic: &str, tone: &str) -> String {
    format!(
        r#"Create a compelling title and subtitle for a nonfiction ebook.

Topic: {topic}
Tone: {tone}

The title should be short and memorable (at most 8 words). The subtitle should state the concrete benefit for the reader.

Respond with JSON only, in this exact shape:
{{"title": "...", "subtitle": "..."}}"#
    )
}

pub fn outline_prompt(
    title: &str,
    subtitle: &str,
    topic: &str,
    tone: &str,
    length: BookLength,
) -> String {
    let count = length.chapter_count();
    let words = length.words_per_chapter();
    format!(
        r#"Plan the chapters of the ebook "{title}: {subtitle}".

Topic: {topic}
Tone: {tone}
Number of chapters: exactly {count}

Each chapter needs a title and a one-sentence goal describing what the reader will be able to do after reading it. Chapters should build on each other in a logical order, each around {words} words.

Respond with JSON only: an array of {count} objects in this shape:
[{{"number": 1, "title": "...", "goal": "...", "estimatedWords": {words}}}]"#
    )
}

pub fn chapter_prompt(
    title: &str,
    tone: &str,
    entry: &OutlineEntry,
    total_chapters: u32,
    previous_summary: Option<&str>,
    words: u32,
) -> String {
    let words = entry.estimated_words.unwrap_or(words);
    let continuity = match previous_summary {
        Some(summary) => format!("The previous chapter covered:\n{summary}\n\nContinue naturally from it without repeating it."),
        None => "This is the opening chapter, so introduce the reader to the subject.".to_string(),
    };
    format!(
        r###"You are writing chapter {number} of {total_chapters} of the ebook "{title}".

Chapter title: {chapter_title}
Chapter goal: {goal}
Tone: {tone}
Target length: about {words} words

{continuity}

Write the full chapter in Markdown. Start with a level-2 heading "## Chapter {number}: {chapter_title}". Use subheadings, short paragraphs, concrete examples, and end with a brief key-takeaways list."###,
        number = entry.number,
        chapter_title = entry.title,
        goal = entry.goal,
    )
}

pub fn cover_prompt(title: &str, subtitle: &str, topic: Option<&str>) -> String {
    let topic_line = topic
        .map(|t| format!("Topic: {t}\n"))
        .unwrap_or_default();
    format!(
        r#"Write a single prompt for an image-generation model that will produce the front cover of an ebook.

Title: {title}
Subtitle: {subtitle}
{topic_line}
Style guidelines: modern and minimal, bold readable typography for the title, one strong central visual metaphor, a limited palette of two or three colours, portrait 2:3 aspect ratio, no photorealistic faces, no extra text besides the title and subtitle.

Respond with the prompt text only, on one paragraph, without quotes or commentary."#
    )
}
