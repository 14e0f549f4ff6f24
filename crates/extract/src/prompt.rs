pub fn build_extraction_prompt(document_text: &str) -> String {
    format!(
        r#"Extract entities, relationships, technical terms and dates from the following text.

INSTRUCTIONS:
1. Identify key entities (people, organizations, concepts, technologies, locations, events)
2. Extract relationships between entities, using entity names as endpoints
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"name": "EntityName", "type": "PERSON|ORGANIZATION|CONCEPT|TECHNOLOGY|LOCATION|EVENT", "aliases": ["other surface forms"]}}
  ],
  "relations": [
    {{"source": "EntityName", "target": "OtherEntity", "relation": "relationship_type", "kind": "asserted|inferred|hypothesis", "confidence": 0.0, "evidence": [{{"snippet": "verbatim quote from text"}}]}}
  ],
  "tech_terms": ["term"],
  "dates": [{{"text": "date as written", "start": "YYYY-MM-DD", "end": "YYYY-MM-DD"}}]
}}

RULES:
- "source" and "target" must be the name (or an alias) of an entity in "entities"
- Use "asserted" only when the text states the relationship; quote it verbatim in "evidence"
- Use "inferred" or "hypothesis" when the relationship is implied; evidence is optional
- "confidence" is a number between 0 and 1; calibrate it per relationship
- Prefer specific relation types ("acquired", "funds", "depends_on") over "mentions"
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        document_text
    )
}
