//! Generation prompts for monetization modules

use crate::db::models::{ModuleType, Product};
use crate::pipeline::EbookJob;
use std::fmt::Write;

fn deliverable(kind: ModuleType) -> &'static str {
    match kind {
        ModuleType::Course => {
            "A mini course of 4 to 6 lessons. For each lesson give a title, learning objective, \
             the lesson script in short paragraphs, and one practical exercise."
        }
        ModuleType::LeadMagnet => {
            "A one-page lead magnet (checklist or cheat sheet) that delivers a quick win and \
             naturally leads readers towards the full product. Include a catchy headline."
        }
        ModuleType::EmailSequence => {
            "A 5-email nurture sequence. For each email give the send day, subject line, preview \
             text and body. The last email makes a clear offer."
        }
        ModuleType::LandingPage => {
            "Landing page copy with a hero headline and subheadline, three benefit blocks, a short \
             description of what is inside, an FAQ with 4 questions, and a call to action."
        }
        ModuleType::SalesPage => {
            "Long-form sales page copy: hook, problem, agitation, solution, what is included, \
             testimonials placeholders, pricing section, guarantee, and a closing call to action."
        }
        ModuleType::SocialPosts => {
            "Ten social media posts promoting the product: a mix of tips, quotes, questions and \
             direct offers, each with suggested hashtags."
        }
    }
}

/// Prompt for one module generation. The source ebook's title and outline
/// are included when the product is linked to one.
pub fn module_prompt(
    kind: ModuleType,
    title: &str,
    product: &Product,
    source: Option<&EbookJob>,
    instructions: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Create a {} titled \"{}\" for the digital product \"{}\".\n",
        kind.label(),
        title,
        product.name
    );

    if let Some(description) = product.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = writeln!(prompt, "Product description: {}", description.trim());
    }

    if let Some(job) = source {
        let _ = writeln!(
            prompt,
            "\nThe product is based on the ebook \"{}\"{}.",
            job.title.as_deref().unwrap_or(&job.topic),
            job.subtitle
                .as_deref()
                .map(|s| format!(": {}", s))
                .unwrap_or_default()
        );
        if !job.outline.is_empty() {
            prompt.push_str("Ebook chapters:\n");
            for entry in &job.outline {
                let _ = writeln!(prompt, "{}. {} - {}", entry.number, entry.title, entry.goal);
            }
        }
    }

    let _ = write!(prompt, "\nDeliverable: {}\n", deliverable(kind));

    if let Some(extra) = instructions.map(str::trim).filter(|s| !s.is_empty()) {
        let _ = writeln!(prompt, "\nAdditional instructions: {}", extra);
    }

    prompt.push_str("\nWrite the result in Markdown, ready to publish.");
    prompt
}
